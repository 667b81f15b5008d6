use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use roxmltree::{Document, Node};
use tracing::debug;

use crate::app::{Faction, Vec3};

use super::database::{
    ActorArchetype, ActorDefId, ArchetypeStats, BodyForm, BodyFormId, DefDatabase, RouteStop,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceLocation {
    pub line: usize,
    pub column: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentErrorCode {
    ReadFile,
    XmlMalformed,
    InvalidRoot,
    UnknownDefType,
    UnknownField,
    DuplicateField,
    MissingField,
    InvalidValue,
    DuplicateDef,
}

#[derive(Debug, Clone)]
pub struct ContentCompileError {
    pub code: ContentErrorCode,
    pub message: String,
    pub file_path: PathBuf,
    pub location: Option<SourceLocation>,
}

impl fmt::Display for ContentCompileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.location {
            Some(loc) => write!(
                f,
                "{:?}: {} (file={}, line={}, column={})",
                self.code,
                self.message,
                self.file_path.display(),
                loc.line,
                loc.column
            ),
            None => write!(
                f,
                "{:?}: {} (file={})",
                self.code,
                self.message,
                self.file_path.display()
            ),
        }
    }
}

impl std::error::Error for ContentCompileError {}

enum ParsedDef {
    Actor(ActorArchetype),
    BodyForm(BodyForm),
}

/// Compiles every `*.xml` under `content_dir` (sorted by relative path) into
/// a [`DefDatabase`]. Ids are assigned in defName order so they stay stable
/// when files are reorganized.
pub fn compile_def_database(content_dir: &Path) -> Result<DefDatabase, ContentCompileError> {
    let xml_files = collect_xml_files_sorted(content_dir)
        .map_err(|error| read_error(error.path, error.source))?;

    let mut actors = BTreeMap::<String, ActorArchetype>::new();
    let mut forms = BTreeMap::<String, BodyForm>::new();
    let mut form_keys = HashSet::<u8>::new();

    for xml_file in xml_files {
        let raw = fs::read_to_string(&xml_file)
            .map_err(|source| read_error(xml_file.clone(), source))?;
        for def in parse_defs_document(&xml_file, &raw)? {
            match def {
                ParsedDef::Actor(actor) => {
                    if actors.contains_key(&actor.def_name) {
                        return Err(duplicate_error(&xml_file, "ActorDef", &actor.def_name));
                    }
                    actors.insert(actor.def_name.clone(), actor);
                }
                ParsedDef::BodyForm(form) => {
                    if forms.contains_key(&form.def_name) {
                        return Err(duplicate_error(&xml_file, "BodyFormDef", &form.def_name));
                    }
                    if !form_keys.insert(form.key) {
                        return Err(ContentCompileError {
                            code: ContentErrorCode::DuplicateDef,
                            message: format!(
                                "body form key {} is bound twice; keys must be unique",
                                form.key
                            ),
                            file_path: xml_file.clone(),
                            location: None,
                        });
                    }
                    forms.insert(form.def_name.clone(), form);
                }
            }
        }
    }

    debug!(
        actor_defs = actors.len(),
        body_forms = forms.len(),
        content_dir = %content_dir.display(),
        "content_compiled"
    );

    Ok(DefDatabase::from_defs(
        actors.into_values().collect(),
        forms.into_values().collect(),
    ))
}

fn parse_defs_document(file_path: &Path, raw: &str) -> Result<Vec<ParsedDef>, ContentCompileError> {
    let doc = Document::parse(raw).map_err(|error| ContentCompileError {
        code: ContentErrorCode::XmlMalformed,
        message: format!("malformed XML: {error}"),
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: error.pos().row as usize,
            column: error.pos().col as usize,
        }),
    })?;

    let root = doc.root_element();
    if root.tag_name().name() != "Defs" {
        return Err(error_at_node(
            ContentErrorCode::InvalidRoot,
            "root element must be <Defs>".to_string(),
            file_path,
            &doc,
            root,
        ));
    }

    let mut defs = Vec::new();
    for child in root.children().filter(|node| node.is_element()) {
        let parsed = match child.tag_name().name() {
            "ActorDef" => ParsedDef::Actor(parse_actor_def(file_path, &doc, child)?),
            "BodyFormDef" => ParsedDef::BodyForm(parse_body_form_def(file_path, &doc, child)?),
            other => {
                return Err(error_at_node(
                    ContentErrorCode::UnknownDefType,
                    format!(
                        "unsupported def type <{other}>; expected <ActorDef> or <BodyFormDef>"
                    ),
                    file_path,
                    &doc,
                    child,
                ))
            }
        };
        defs.push(parsed);
    }

    Ok(defs)
}

fn parse_actor_def(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<ActorArchetype, ContentCompileError> {
    let mut seen_fields = HashSet::<String>::new();
    let mut def_name: Option<String> = None;
    let mut label: Option<String> = None;
    let mut faction = Faction::default();
    let mut stats = ArchetypeStats::default();
    let mut dialogue_file: Option<String> = None;
    let mut patrol_route = Vec::<RouteStop>::new();

    for field in node.children().filter(|child| child.is_element()) {
        let field_name = field.tag_name().name();
        check_unique_field(&mut seen_fields, "ActorDef", file_path, doc, field)?;

        match field_name {
            "defName" => def_name = Some(required_text(file_path, doc, field)?),
            "label" => label = Some(required_text(file_path, doc, field)?),
            "faction" => {
                let value = required_text(file_path, doc, field)?;
                faction = Faction::from_token(&value).ok_or_else(|| {
                    error_at_node(
                        ContentErrorCode::InvalidValue,
                        format!(
                            "invalid faction '{value}'; allowed values: player, friendly, enemy"
                        ),
                        file_path,
                        doc,
                        field,
                    )
                })?;
            }
            "health" => {
                let health = parse_field::<u32>(file_path, doc, field)?;
                if health == 0 {
                    return Err(error_at_node(
                        ContentErrorCode::InvalidValue,
                        "health must be >= 1".to_string(),
                        file_path,
                        doc,
                        field,
                    ));
                }
                stats.health = health;
            }
            "power" => stats.power = parse_field(file_path, doc, field)?,
            "defence" => stats.defence = parse_field(file_path, doc, field)?,
            "speed" => stats.speed = parse_non_negative(file_path, doc, field)?,
            "reach" => stats.reach = parse_non_negative(file_path, doc, field)?,
            "farsight" => stats.farsight = parse_non_negative(file_path, doc, field)?,
            "dialogue" => dialogue_file = Some(required_text(file_path, doc, field)?),
            "route" => patrol_route = parse_route(file_path, doc, field)?,
            _ => {
                return Err(error_at_node(
                    ContentErrorCode::UnknownField,
                    format!("unknown field <{field_name}> in <ActorDef>"),
                    file_path,
                    doc,
                    field,
                ))
            }
        }
    }

    let def_name = require(def_name, "defName", "ActorDef", file_path, doc, node)?;
    let label = require(label, "label", "ActorDef", file_path, doc, node)?;

    Ok(ActorArchetype {
        id: ActorDefId(0),
        def_name,
        label,
        faction,
        stats,
        dialogue_file,
        patrol_route,
    })
}

fn parse_body_form_def(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<BodyForm, ContentCompileError> {
    let defaults = ArchetypeStats::default();
    let mut seen_fields = HashSet::<String>::new();
    let mut def_name: Option<String> = None;
    let mut key: Option<u8> = None;
    let mut sprite: Option<String> = None;
    let mut form = BodyForm {
        id: BodyFormId(0),
        def_name: String::new(),
        key: 0,
        sprite: String::new(),
        reach: defaults.reach,
        farsight: defaults.farsight,
        speed: defaults.speed,
        power: defaults.power,
        defence: defaults.defence,
    };

    for field in node.children().filter(|child| child.is_element()) {
        let field_name = field.tag_name().name();
        check_unique_field(&mut seen_fields, "BodyFormDef", file_path, doc, field)?;

        match field_name {
            "defName" => def_name = Some(required_text(file_path, doc, field)?),
            "key" => key = Some(parse_field(file_path, doc, field)?),
            "sprite" => sprite = Some(required_text(file_path, doc, field)?),
            "reach" => form.reach = parse_non_negative(file_path, doc, field)?,
            "farsight" => form.farsight = parse_non_negative(file_path, doc, field)?,
            "speed" => form.speed = parse_non_negative(file_path, doc, field)?,
            "power" => form.power = parse_field(file_path, doc, field)?,
            "defence" => form.defence = parse_field(file_path, doc, field)?,
            _ => {
                return Err(error_at_node(
                    ContentErrorCode::UnknownField,
                    format!("unknown field <{field_name}> in <BodyFormDef>"),
                    file_path,
                    doc,
                    field,
                ))
            }
        }
    }

    form.def_name = require(def_name, "defName", "BodyFormDef", file_path, doc, node)?;
    form.key = require(key, "key", "BodyFormDef", file_path, doc, node)?;
    form.sprite = require(sprite, "sprite", "BodyFormDef", file_path, doc, node)?;
    Ok(form)
}

/// `<route><li>x,z</li><li>terminate</li></route>`
fn parse_route(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<Vec<RouteStop>, ContentCompileError> {
    let mut stops = Vec::new();
    for item in node.children().filter(|child| child.is_element()) {
        if item.tag_name().name() != "li" {
            return Err(error_at_node(
                ContentErrorCode::UnknownField,
                format!(
                    "unexpected <{}> in <route>; entries must be <li>",
                    item.tag_name().name()
                ),
                file_path,
                doc,
                item,
            ));
        }
        let value = required_text(file_path, doc, item)?;
        if value.eq_ignore_ascii_case("terminate") {
            stops.push(RouteStop::Terminate);
            continue;
        }
        let invalid = || {
            error_at_node(
                ContentErrorCode::InvalidValue,
                format!("route entry '{value}' must be 'x,z' or 'terminate'"),
                file_path,
                doc,
                item,
            )
        };
        let Some((x_raw, z_raw)) = value.split_once(',') else {
            return Err(invalid());
        };
        let (Ok(x), Ok(z)) = (x_raw.trim().parse::<f32>(), z_raw.trim().parse::<f32>()) else {
            return Err(invalid());
        };
        if !x.is_finite() || !z.is_finite() {
            return Err(invalid());
        }
        stops.push(RouteStop::Point(Vec3::new(x, 0.0, z)));
    }
    Ok(stops)
}

fn check_unique_field(
    seen_fields: &mut HashSet<String>,
    def_type: &str,
    file_path: &Path,
    doc: &Document<'_>,
    field: Node<'_, '_>,
) -> Result<(), ContentCompileError> {
    let field_name = field.tag_name().name();
    if seen_fields.insert(field_name.to_string()) {
        return Ok(());
    }
    Err(error_at_node(
        ContentErrorCode::DuplicateField,
        format!("duplicate field <{field_name}> in <{def_type}>"),
        file_path,
        doc,
        field,
    ))
}

fn require<T>(
    value: Option<T>,
    field_name: &str,
    def_type: &str,
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<T, ContentCompileError> {
    value.ok_or_else(|| {
        error_at_node(
            ContentErrorCode::MissingField,
            format!("missing required field <{field_name}> in <{def_type}>"),
            file_path,
            doc,
            node,
        )
    })
}

fn parse_field<T: FromStr>(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<T, ContentCompileError> {
    let value = required_text(file_path, doc, node)?;
    value.parse::<T>().map_err(|_| {
        error_at_node(
            ContentErrorCode::InvalidValue,
            format!(
                "{} '{}' is not a valid value",
                node.tag_name().name(),
                value
            ),
            file_path,
            doc,
            node,
        )
    })
}

fn parse_non_negative(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<f32, ContentCompileError> {
    let parsed = parse_field::<f32>(file_path, doc, node)?;
    if !parsed.is_finite() || parsed < 0.0 {
        return Err(error_at_node(
            ContentErrorCode::InvalidValue,
            format!("{} must be finite and >= 0", node.tag_name().name()),
            file_path,
            doc,
            node,
        ));
    }
    Ok(parsed)
}

fn required_text(
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> Result<String, ContentCompileError> {
    let value = node.text().map(str::trim).unwrap_or_default().to_string();
    if value.is_empty() {
        return Err(error_at_node(
            ContentErrorCode::MissingField,
            format!("field <{}> must not be empty", node.tag_name().name()),
            file_path,
            doc,
            node,
        ));
    }
    Ok(value)
}

fn error_at_node(
    code: ContentErrorCode,
    message: String,
    file_path: &Path,
    doc: &Document<'_>,
    node: Node<'_, '_>,
) -> ContentCompileError {
    let pos = doc.text_pos_at(node.range().start);
    ContentCompileError {
        code,
        message,
        file_path: file_path.to_path_buf(),
        location: Some(SourceLocation {
            line: pos.row as usize,
            column: pos.col as usize,
        }),
    }
}

fn duplicate_error(file_path: &Path, def_type: &str, def_name: &str) -> ContentCompileError {
    ContentCompileError {
        code: ContentErrorCode::DuplicateDef,
        message: format!("duplicate {def_type} '{def_name}'; each defName may appear only once"),
        file_path: file_path.to_path_buf(),
        location: None,
    }
}

struct ReadError {
    path: PathBuf,
    source: std::io::Error,
}

fn collect_xml_files_sorted(root: &Path) -> Result<Vec<PathBuf>, ReadError> {
    let mut files = Vec::<PathBuf>::new();
    collect_recursive(root, &mut files)?;
    files.sort_by_key(|path| normalize_rel_path(path.strip_prefix(root).unwrap_or(path)));
    Ok(files)
}

fn collect_recursive(current: &Path, files: &mut Vec<PathBuf>) -> Result<(), ReadError> {
    let entries = fs::read_dir(current).map_err(|source| ReadError {
        path: current.to_path_buf(),
        source,
    })?;
    for entry in entries {
        let entry = entry.map_err(|source| ReadError {
            path: current.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_dir() {
            collect_recursive(&path, files)?;
        } else if path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("xml"))
        {
            files.push(path);
        }
    }
    Ok(())
}

fn normalize_rel_path(path: &Path) -> String {
    path.components()
        .map(|component| component.as_os_str().to_string_lossy().to_string())
        .collect::<Vec<_>>()
        .join("/")
}

fn read_error(path: PathBuf, source: std::io::Error) -> ContentCompileError {
    ContentCompileError {
        code: ContentErrorCode::ReadFile,
        message: format!("failed to read XML content: {source}"),
        file_path: path,
        location: None,
    }
}
