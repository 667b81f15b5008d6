use engine::{BodyForm, DefDatabase};

use super::status::StatSwap;

/// Body forms the player can switch into, keyed by their number key.
#[derive(Debug, Clone, Default)]
pub(crate) struct BodyFormTable {
    forms: Vec<BodyForm>,
}

impl BodyFormTable {
    pub(crate) fn from_database(defs: &DefDatabase) -> Self {
        Self {
            forms: defs.body_forms().to_vec(),
        }
    }

    pub(crate) fn by_key(&self, key: u8) -> Option<&BodyForm> {
        self.forms.iter().find(|form| form.key == key)
    }

    pub(crate) fn len(&self) -> usize {
        self.forms.len()
    }
}

/// A form overwrites every swappable stat.
pub(crate) fn stat_swap_for(form: &BodyForm) -> StatSwap {
    StatSwap {
        reach: Some(form.reach),
        farsight: Some(form.farsight),
        speed: Some(form.speed),
        power: Some(form.power),
        defence: Some(form.defence),
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use engine::compile_def_database;
    use tempfile::TempDir;

    use super::*;

    #[test]
    fn forms_compile_from_defs_and_map_to_full_swaps() {
        let temp = TempDir::new().expect("temp");
        fs::write(
            temp.path().join("forms.xml"),
            r#"<Defs>
                <BodyFormDef>
                    <defName>Mink</defName>
                    <key>2</key>
                    <sprite>mink</sprite>
                    <speed>0.2</speed>
                    <farsight>15</farsight>
                </BodyFormDef>
            </Defs>"#,
        )
        .expect("write");

        let defs = compile_def_database(temp.path()).expect("compile");
        let table = BodyFormTable::from_database(&defs);
        assert_eq!(table.len(), 1);
        assert!(table.by_key(1).is_none());

        let mink = table.by_key(2).expect("mink");
        assert_eq!(mink.sprite, "mink");
        let swap = stat_swap_for(mink);
        assert_eq!(swap.speed, Some(0.2));
        assert_eq!(swap.farsight, Some(15.0));
        assert!(swap.power.is_some() && swap.defence.is_some() && swap.reach.is_some());
    }
}
