use std::collections::HashMap;

use engine::Vec3;
use tracing::debug;

/// Below this an actor counts as arrived even when its reach is zero.
const MIN_ARRIVAL_DISTANCE: f32 = 0.1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct NodeGroup(pub(crate) u32);

/// Path queries against a precomputed walkable surface, per zone.
pub(crate) trait PathfindingService {
    /// Group of the walkable node nearest to `position`.
    fn group_for(&self, zone: &str, position: Vec3) -> Option<NodeGroup>;
    /// Ordered waypoints from `start` toward `target`, excluding `start`.
    fn find_path(&self, zone: &str, group: NodeGroup, start: Vec3, target: Vec3)
        -> Option<Vec<Vec3>>;
}

pub(crate) fn ground_distance(a: Vec3, b: Vec3) -> f32 {
    let dx = b.x - a.x;
    let dz = b.z - a.z;
    (dx * dx + dz * dz).sqrt()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NavPhase {
    Idle,
    Seeking,
    Navigating,
    Arrived,
    GaveUp,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) enum NavEvent {
    Arrived { position: Vec3 },
    GaveUp,
    ReturnedHome,
}

#[derive(Debug, Clone)]
pub(crate) struct NavigationPlanner {
    zone: String,
    origin: Vec3,
    target: Option<Vec3>,
    waypoint: Option<Vec3>,
    reach: f32,
    farsight: f32,
    phase: NavPhase,
    returning_home: bool,
    events: Vec<NavEvent>,
}

impl NavigationPlanner {
    pub(crate) fn new(zone: impl Into<String>, origin: Vec3, reach: f32, farsight: f32) -> Self {
        Self {
            zone: zone.into(),
            origin,
            target: None,
            waypoint: None,
            reach,
            farsight,
            phase: NavPhase::Idle,
            returning_home: false,
            events: Vec::new(),
        }
    }

    #[cfg(test)]
    pub(crate) fn zone(&self) -> &str {
        &self.zone
    }

    #[cfg(test)]
    pub(crate) fn phase(&self) -> NavPhase {
        self.phase
    }

    pub(crate) fn target(&self) -> Option<Vec3> {
        self.target
    }

    #[cfg(test)]
    pub(crate) fn waypoint(&self) -> Option<Vec3> {
        self.waypoint
    }

    #[cfg(test)]
    pub(crate) fn is_returning_home(&self) -> bool {
        self.returning_home
    }

    pub(crate) fn set_target(&mut self, target: Vec3) {
        self.target = Some(target);
        self.returning_home = false;
        self.phase = NavPhase::Seeking;
    }

    pub(crate) fn set_thresholds(&mut self, reach: f32, farsight: f32) {
        self.reach = reach;
        self.farsight = farsight;
    }

    pub(crate) fn drain_events(&mut self) -> Vec<NavEvent> {
        std::mem::take(&mut self.events)
    }

    /// Advances the state machine and returns the waypoint to steer toward
    /// this tick, if any.
    pub(crate) fn update(
        &mut self,
        position: Vec3,
        pathfinder: &dyn PathfindingService,
    ) -> Option<Vec3> {
        match self.phase {
            NavPhase::Idle => return None,
            NavPhase::Arrived => {
                self.phase = NavPhase::Idle;
                return None;
            }
            NavPhase::Seeking | NavPhase::Navigating | NavPhase::GaveUp => {}
        }

        let Some(target) = self.target else {
            self.phase = NavPhase::Idle;
            return None;
        };

        let Some(waypoint) = self.plan_waypoint(position, target, pathfinder) else {
            debug!(zone = %self.zone, "nav_no_path");
            self.phase = NavPhase::Seeking;
            self.waypoint = None;
            return None;
        };
        self.waypoint = Some(waypoint);

        let distance = ground_distance(position, waypoint);
        if distance <= self.reach.max(MIN_ARRIVAL_DISTANCE) {
            self.phase = NavPhase::Arrived;
            self.target = None;
            if self.returning_home {
                self.returning_home = false;
                self.events.push(NavEvent::ReturnedHome);
            } else {
                self.events.push(NavEvent::Arrived { position: waypoint });
            }
            return None;
        }

        if !self.returning_home && distance > self.farsight {
            self.phase = NavPhase::GaveUp;
            self.returning_home = true;
            self.target = Some(self.origin);
            self.waypoint = Some(self.origin);
            self.events.push(NavEvent::GaveUp);
            return None;
        }

        self.phase = NavPhase::Navigating;
        Some(waypoint)
    }

    fn plan_waypoint(
        &self,
        position: Vec3,
        target: Vec3,
        pathfinder: &dyn PathfindingService,
    ) -> Option<Vec3> {
        let group = pathfinder.group_for(&self.zone, target)?;
        let path = pathfinder.find_path(&self.zone, group, position, target)?;
        let last_index = path.len().checked_sub(1)?;
        let reach = self.reach.max(MIN_ARRIVAL_DISTANCE);
        path.iter()
            .enumerate()
            .find(|(index, node)| {
                *index == last_index || ground_distance(position, **node) > reach
            })
            .map(|(_, node)| *node)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct TileCoord {
    x: u32,
    z: u32,
}

/// Tile grid for one zone: walkable cells of size 1 starting at `origin`,
/// grouped into connected components.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct WalkGrid {
    width: u32,
    height: u32,
    origin: Vec3,
    walkable: Vec<bool>,
    groups: Vec<Option<u32>>,
}

impl WalkGrid {
    pub(crate) fn open(width: u32, height: u32, origin: Vec3) -> Self {
        let mut grid = Self {
            width,
            height,
            origin,
            walkable: vec![true; (width * height) as usize],
            groups: Vec::new(),
        };
        grid.rebuild_groups();
        grid
    }

    #[cfg(test)]
    pub(crate) fn block_cell(&mut self, x: u32, z: u32) {
        if let Some(index) = self.index_of(TileCoord { x, z }) {
            self.walkable[index] = false;
            self.rebuild_groups();
        }
    }

    /// Blocks every cell whose center lies inside the given ground rectangle.
    pub(crate) fn block_world_rect(&mut self, min: Vec3, max: Vec3) {
        for z in 0..self.height {
            for x in 0..self.width {
                let center = self.tile_center_world(TileCoord { x, z });
                if center.x >= min.x && center.x <= max.x && center.z >= min.z && center.z <= max.z
                {
                    if let Some(index) = self.index_of(TileCoord { x, z }) {
                        self.walkable[index] = false;
                    }
                }
            }
        }
        self.rebuild_groups();
    }

    fn rebuild_groups(&mut self) {
        let node_count = (self.width * self.height) as usize;
        let mut groups = vec![None::<u32>; node_count];
        let mut next_group = 0u32;
        let mut stack = Vec::new();
        for seed in 0..node_count {
            if !self.walkable[seed] || groups[seed].is_some() {
                continue;
            }
            groups[seed] = Some(next_group);
            stack.push(seed);
            while let Some(index) = stack.pop() {
                let coord = self.coord_of(index);
                for neighbor in self.neighbors(coord).into_iter().flatten() {
                    let Some(neighbor_index) = self.index_of(neighbor) else {
                        continue;
                    };
                    if self.walkable[neighbor_index] && groups[neighbor_index].is_none() {
                        groups[neighbor_index] = Some(next_group);
                        stack.push(neighbor_index);
                    }
                }
            }
            next_group = next_group.saturating_add(1);
        }
        self.groups = groups;
    }

    fn world_to_tile(&self, world: Vec3) -> Option<TileCoord> {
        let tile_x = (world.x - self.origin.x).floor() as i32;
        let tile_z = (world.z - self.origin.z).floor() as i32;
        if tile_x < 0 || tile_z < 0 {
            return None;
        }
        let coord = TileCoord {
            x: tile_x as u32,
            z: tile_z as u32,
        };
        self.index_of(coord).map(|_| coord)
    }

    fn tile_center_world(&self, tile: TileCoord) -> Vec3 {
        Vec3::new(
            self.origin.x + tile.x as f32 + 0.5,
            self.origin.y,
            self.origin.z + tile.z as f32 + 0.5,
        )
    }

    fn index_of(&self, tile: TileCoord) -> Option<usize> {
        if tile.x >= self.width || tile.z >= self.height {
            return None;
        }
        Some(tile.z as usize * self.width as usize + tile.x as usize)
    }

    fn coord_of(&self, index: usize) -> TileCoord {
        TileCoord {
            x: (index as u32) % self.width,
            z: (index as u32) / self.width,
        }
    }

    fn is_walkable(&self, tile: TileCoord) -> bool {
        self.index_of(tile)
            .and_then(|index| self.walkable.get(index))
            .copied()
            .unwrap_or(false)
    }

    fn group_of(&self, tile: TileCoord) -> Option<u32> {
        self.index_of(tile)
            .and_then(|index| self.groups.get(index))
            .copied()
            .flatten()
    }

    /// Walkable tile closest to `world`, optionally restricted to one group.
    fn closest_tile(&self, world: Vec3, group: Option<u32>) -> Option<TileCoord> {
        if let Some(tile) = self.world_to_tile(world) {
            if self.is_walkable(tile) && (group.is_none() || self.group_of(tile) == group) {
                return Some(tile);
            }
        }
        let mut best: Option<(f32, TileCoord)> = None;
        for index in 0..self.walkable.len() {
            let tile = self.coord_of(index);
            if !self.walkable[index] || (group.is_some() && self.group_of(tile) != group) {
                continue;
            }
            let distance = ground_distance(world, self.tile_center_world(tile));
            if best.map_or(true, |(best_distance, _)| distance < best_distance) {
                best = Some((distance, tile));
            }
        }
        best.map(|(_, tile)| tile)
    }

    fn find_path_tiles(&self, start: TileCoord, goal: TileCoord) -> Option<Vec<TileCoord>> {
        let start_index = self.index_of(start)?;
        let goal_index = self.index_of(goal)?;
        if !self.is_walkable(start) || !self.is_walkable(goal) {
            return None;
        }

        if start == goal {
            return Some(vec![start]);
        }

        let node_count = (self.width * self.height) as usize;
        let mut closed = vec![false; node_count];
        let mut best_g = vec![u32::MAX; node_count];
        let mut parent = vec![None::<usize>; node_count];
        let mut open = Vec::new();
        let mut next_insertion = 0u64;

        let start_h = manhattan_distance(start, goal);
        open.push(OpenNode {
            coord: start,
            h_cost: start_h,
            f_cost: start_h,
            insertion_order: next_insertion,
        });
        next_insertion = next_insertion.saturating_add(1);
        best_g[start_index] = 0;

        while !open.is_empty() {
            let best_index = pick_best_open_node_index(&open);
            let current = open.swap_remove(best_index);
            let Some(current_index) = self.index_of(current.coord) else {
                continue;
            };
            if closed[current_index] {
                continue;
            }
            closed[current_index] = true;

            if current.coord == goal {
                return self.reconstruct_tile_path(&parent, start_index, goal_index);
            }

            let current_g = best_g[current_index];
            for neighbor in self.neighbors(current.coord).into_iter().flatten() {
                let Some(neighbor_index) = self.index_of(neighbor) else {
                    continue;
                };
                if closed[neighbor_index] || !self.is_walkable(neighbor) {
                    continue;
                }

                let tentative_g = current_g.saturating_add(1);
                if tentative_g >= best_g[neighbor_index] {
                    continue;
                }

                best_g[neighbor_index] = tentative_g;
                parent[neighbor_index] = Some(current_index);
                let h_cost = manhattan_distance(neighbor, goal);
                open.push(OpenNode {
                    coord: neighbor,
                    h_cost,
                    f_cost: tentative_g.saturating_add(h_cost),
                    insertion_order: next_insertion,
                });
                next_insertion = next_insertion.saturating_add(1);
            }
        }

        None
    }

    fn neighbors(&self, coord: TileCoord) -> [Option<TileCoord>; 4] {
        let south = (coord.z + 1 < self.height).then(|| TileCoord {
            x: coord.x,
            z: coord.z + 1,
        });
        let east = (coord.x + 1 < self.width).then(|| TileCoord {
            x: coord.x + 1,
            z: coord.z,
        });
        let north = (coord.z > 0).then(|| TileCoord {
            x: coord.x,
            z: coord.z - 1,
        });
        let west = (coord.x > 0).then(|| TileCoord {
            x: coord.x - 1,
            z: coord.z,
        });
        [south, east, north, west]
    }

    fn reconstruct_tile_path(
        &self,
        parent: &[Option<usize>],
        start_index: usize,
        goal_index: usize,
    ) -> Option<Vec<TileCoord>> {
        let mut cursor = goal_index;
        let mut indices = vec![cursor];

        while cursor != start_index {
            let next = parent.get(cursor).and_then(|value| *value)?;
            cursor = next;
            indices.push(cursor);
        }
        indices.reverse();
        Some(indices.into_iter().map(|index| self.coord_of(index)).collect())
    }
}

#[derive(Debug, Clone, Copy)]
struct OpenNode {
    coord: TileCoord,
    h_cost: u32,
    f_cost: u32,
    insertion_order: u64,
}

fn pick_best_open_node_index(open: &[OpenNode]) -> usize {
    let mut best_index = 0usize;
    for index in 1..open.len() {
        if open_node_order_key(open[index]) < open_node_order_key(open[best_index]) {
            best_index = index;
        }
    }
    best_index
}

fn open_node_order_key(node: OpenNode) -> (u32, u32, u32, u32, u64) {
    (
        node.f_cost,
        node.h_cost,
        node.coord.z,
        node.coord.x,
        node.insertion_order,
    )
}

fn manhattan_distance(a: TileCoord, b: TileCoord) -> u32 {
    a.x.abs_diff(b.x).saturating_add(a.z.abs_diff(b.z))
}

/// Grid-backed pathfinding: one [`WalkGrid`] per zone, node groups are the
/// grid's connected components.
#[derive(Debug, Clone, Default)]
pub(crate) struct GridPathfinder {
    zones: HashMap<String, WalkGrid>,
}

impl GridPathfinder {
    pub(crate) fn with_zone(mut self, zone: impl Into<String>, grid: WalkGrid) -> Self {
        self.zones.insert(zone.into(), grid);
        self
    }
}

impl PathfindingService for GridPathfinder {
    fn group_for(&self, zone: &str, position: Vec3) -> Option<NodeGroup> {
        let grid = self.zones.get(zone)?;
        let tile = grid.closest_tile(position, None)?;
        grid.group_of(tile).map(NodeGroup)
    }

    fn find_path(
        &self,
        zone: &str,
        group: NodeGroup,
        start: Vec3,
        target: Vec3,
    ) -> Option<Vec<Vec3>> {
        let grid = self.zones.get(zone)?;
        let start_tile = grid.world_to_tile(start)?;
        if grid.group_of(start_tile) != Some(group.0) {
            return None;
        }
        let goal_tile = grid.closest_tile(target, Some(group.0))?;
        let tile_path = grid.find_path_tiles(start_tile, goal_tile)?;

        let target_on_goal = grid.world_to_tile(target) == Some(goal_tile);
        let mut waypoints = tile_path
            .iter()
            .skip(1)
            .map(|tile| grid.tile_center_world(*tile))
            .collect::<Vec<_>>();
        let final_point = if target_on_goal {
            target
        } else {
            grid.tile_center_world(goal_tile)
        };
        match waypoints.last_mut() {
            Some(last) => *last = final_point,
            None => waypoints.push(final_point),
        }
        Some(waypoints)
    }
}
