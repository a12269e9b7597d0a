//! Stable node identity.
//!
//! Refs are short textual ids handed to clients: the first three characters
//! of the class name plus the instance id in decimal (`Cha1042`). Instance
//! ids are unique for the engine lifetime, so refs never collide; the class
//! prefix exists purely so a human can tell a `Cha…` body from a `But…`ton.
//!
//! The map never pins nodes alive: every resolution re-validates the id and
//! evicts stale entries.

use std::collections::HashMap;

use crate::engine::{InstanceId, Scene};

#[derive(Debug, Default)]
pub struct RefMap {
    by_id: HashMap<InstanceId, String>,
    by_ref: HashMap<String, InstanceId>,
}

impl RefMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop entries whose node is gone or detached. Called at the start of
    /// every snapshot so the map tracks the live tree.
    pub fn prune<S: Scene + ?Sized>(&mut self, scene: &S) {
        let stale: Vec<InstanceId> = self
            .by_id
            .keys()
            .copied()
            .filter(|&id| !scene.is_valid(id) || !scene.is_in_tree(id))
            .collect();
        for id in stale {
            if let Some(r) = self.by_id.remove(&id) {
                self.by_ref.remove(&r);
            }
        }
    }

    /// Existing ref for a node, or a freshly assigned one.
    pub fn ref_for<S: Scene + ?Sized>(&mut self, scene: &S, id: InstanceId) -> String {
        if let Some(existing) = self.by_id.get(&id) {
            return existing.clone();
        }
        let class = scene.class_name(id).unwrap_or("Nod");
        let prefix: String = class.chars().take(3).collect();
        let node_ref = format!("{}{}", prefix, id.get());
        self.by_id.insert(id, node_ref.clone());
        self.by_ref.insert(node_ref.clone(), id);
        node_ref
    }

    /// Look a ref up without assigning, validating liveness. Stale hits are
    /// evicted and report `None`.
    pub fn lookup<S: Scene + ?Sized>(&mut self, scene: &S, node_ref: &str) -> Option<InstanceId> {
        let id = *self.by_ref.get(node_ref)?;
        if scene.is_valid(id) && scene.is_in_tree(id) {
            Some(id)
        } else {
            self.by_ref.remove(node_ref);
            self.by_id.remove(&id);
            None
        }
    }

    /// Resolve a client-supplied identifier: ref first, then a node path
    /// under `root` (defaulting to the scene root).
    pub fn resolve<S: Scene + ?Sized>(
        &mut self,
        scene: &S,
        ident: &str,
        root: Option<InstanceId>,
    ) -> Option<InstanceId> {
        if ident.is_empty() {
            return None;
        }
        if let Some(id) = self.lookup(scene, ident) {
            return Some(id);
        }
        let root = root.or_else(|| scene.scene_root())?;
        scene.resolve_path(root, ident)
    }

    /// Resolve for subtree selection: like [`RefMap::resolve`] but an
    /// unresolvable or empty identifier falls back to the scene root, so
    /// `root=` on `/snapshot` degrades to a full-scene walk.
    pub fn resolve_or_scene_root<S: Scene + ?Sized>(
        &mut self,
        scene: &S,
        ident: &str,
    ) -> Option<InstanceId> {
        if !ident.is_empty() {
            if let Some(id) = self.resolve(scene, ident, None) {
                return Some(id);
            }
        }
        scene.scene_root()
    }

    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sim::SimEngine;

    #[test]
    fn ref_format_is_class_prefix_plus_id() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let player = sim.add_child(root, "Player", "CharacterBody2D");

        let mut refs = RefMap::new();
        let r = refs.ref_for(&sim, player);
        assert_eq!(r, format!("Cha{}", player.get()));
        // Stable on repeat.
        assert_eq!(refs.ref_for(&sim, player), r);
    }

    #[test]
    fn freed_nodes_resolve_to_none_and_are_evicted() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let enemy = sim.add_child(root, "Enemy", "Area2D");

        let mut refs = RefMap::new();
        let r = refs.ref_for(&sim, enemy);
        assert!(refs.lookup(&sim, &r).is_some());

        sim.remove_node(enemy);
        assert!(refs.lookup(&sim, &r).is_none());
        assert!(refs.is_empty());
    }

    #[test]
    fn resolve_falls_back_to_paths() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let hud = sim.add_child(root, "HUD", "Control");
        let label = sim.add_child(hud, "Score", "Label");

        let mut refs = RefMap::new();
        assert_eq!(refs.resolve(&sim, "HUD/Score", None), Some(label));
        assert_eq!(refs.resolve(&sim, "Nope/Nothing", None), None);
        assert_eq!(refs.resolve_or_scene_root(&sim, "Nope"), Some(root));
        assert_eq!(refs.resolve_or_scene_root(&sim, ""), Some(root));
    }

    #[test]
    fn prune_drops_detached_entries() {
        let mut sim = SimEngine::new("t");
        sim.set_scene("Main", "res://main.tscn");
        let root = sim.scene_root().unwrap();
        let a = sim.add_child(root, "A", "Node2D");
        let b = sim.add_child(root, "B", "Node2D");

        let mut refs = RefMap::new();
        refs.ref_for(&sim, a);
        refs.ref_for(&sim, b);
        assert_eq!(refs.len(), 2);

        sim.remove_node(a);
        refs.prune(&sim);
        assert_eq!(refs.len(), 1);
    }
}
