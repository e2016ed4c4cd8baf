//! Trigger annotations: per-node connections and menu-command templates
//!
//! A trigger annotation gives a node an addressable list of outgoing
//! "connections" (references to other nodes) plus labeled command
//! templates for its right-click menu. Templates reference connections by
//! slot and are substituted against *live* node names at call time, so a
//! command keeps working across renames for as long as the connection
//! itself persists.
//!
//! Tokens:
//! - `#`    the annotated node itself
//! - `%N`   connection in slot N
//! - `@a,b` connections a..=b expanded space-separated (b = -1 means end)
//!
//! A genuinely dangling token resolves to an explicit marker string rather
//! than raising - these are best-effort UI affordances, not core data.

use serde::{Deserialize, Serialize};

use crate::scene::{NodeId, Scene};

/// What a dangling token resolves to.
pub const INVALID_MARKER: &str = "<missing>";

/// One right-click menu entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerItem {
    pub label: String,
    pub command: String,
}

/// Per-node trigger data: connection slots plus menu items.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TriggerAnnotation {
    pub connections: Vec<NodeId>,
    pub items: Vec<TriggerItem>,
}

fn annotation_mut(scene: &mut Scene, node: NodeId) -> &mut TriggerAnnotation {
    if !scene.triggers.contains(node) {
        scene.triggers.insert(node, TriggerAnnotation::default());
    }
    scene.triggers.get_mut(node).unwrap()
}

/// Register an outgoing connection, returning its slot. Adding a target
/// that is already connected returns the existing slot.
pub fn add_connection(scene: &mut Scene, node: NodeId, target: NodeId) -> usize {
    let annotation = annotation_mut(scene, node);
    if let Some(idx) = annotation.connections.iter().position(|&c| c == target) {
        return idx;
    }
    annotation.connections.push(target);
    annotation.connections.len() - 1
}

/// The node's connection slots, in order. Slots may reference deleted
/// nodes; `resolve` and `scrub` deal with that.
pub fn connections(scene: &Scene, node: NodeId) -> Vec<NodeId> {
    scene
        .triggers
        .get(node)
        .map(|a| a.connections.clone())
        .unwrap_or_default()
}

/// Append a menu item.
pub fn add_menu_item(scene: &mut Scene, node: NodeId, label: &str, command: &str) {
    annotation_mut(scene, node).items.push(TriggerItem {
        label: label.to_string(),
        command: command.to_string(),
    });
}

/// The node's menu items, in order.
pub fn items(scene: &Scene, node: NodeId) -> Vec<TriggerItem> {
    scene
        .triggers
        .get(node)
        .map(|a| a.items.clone())
        .unwrap_or_default()
}

/// Remove menu items matching a predicate. Used by space-switch removal
/// to drop the menu entry of a deleted target.
pub fn retain_items<F: FnMut(&TriggerItem) -> bool>(scene: &mut Scene, node: NodeId, keep: F) {
    if let Some(annotation) = scene.triggers.get_mut(node) {
        annotation.items.retain(keep);
    }
}

/// Rewrite menu-item commands in place.
pub fn map_item_commands<F: FnMut(&str) -> String>(scene: &mut Scene, node: NodeId, mut f: F) {
    if let Some(annotation) = scene.triggers.get_mut(node) {
        for item in &mut annotation.items {
            item.command = f(&item.command);
        }
    }
}

/// One parsed template token.
enum Token {
    SelfRef,
    Slot(usize),
    Slice(usize, i64),
}

/// Scan a template for tokens, returning (start, end, token) spans.
fn scan_tokens(template: &str) -> Vec<(usize, usize, Token)> {
    let bytes = template.as_bytes();
    let mut out = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'#' => {
                out.push((i, i + 1, Token::SelfRef));
                i += 1;
            }
            b'%' => {
                let start = i;
                i += 1;
                let digits_start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i > digits_start {
                    let n: usize = template[digits_start..i].parse().unwrap_or(usize::MAX);
                    out.push((start, i, Token::Slot(n)));
                }
            }
            b'@' => {
                let start = i;
                i += 1;
                let a_start = i;
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i == a_start || i >= bytes.len() || bytes[i] != b',' {
                    continue;
                }
                let a: usize = template[a_start..i].parse().unwrap_or(usize::MAX);
                i += 1; // comma
                let b_start = i;
                if i < bytes.len() && bytes[i] == b'-' {
                    i += 1;
                }
                while i < bytes.len() && bytes[i].is_ascii_digit() {
                    i += 1;
                }
                if i == b_start {
                    continue;
                }
                let b: i64 = template[b_start..i].parse().unwrap_or(i64::MAX);
                out.push((start, i, Token::Slice(a, b)));
            }
            _ => i += 1,
        }
    }
    out
}

fn slot_name(scene: &Scene, slots: &[NodeId], n: usize) -> String {
    match slots.get(n) {
        Some(&id) if scene.is_alive(id) => scene.name(id).to_string(),
        _ => INVALID_MARKER.to_string(),
    }
}

/// Expand a slice token's slot range; `b = -1` runs to the last slot.
fn slice_range(slots: &[NodeId], a: usize, b: i64) -> Vec<usize> {
    if slots.is_empty() {
        return vec![a]; // Forces the invalid marker downstream
    }
    let end = if b < 0 {
        slots.len() - 1
    } else {
        b as usize
    };
    if a > end {
        return vec![a];
    }
    (a..=end).collect()
}

/// Substitute a command template against live node names.
pub fn resolve(scene: &Scene, node: NodeId, template: &str) -> String {
    let slots = connections(scene, node);
    let mut out = String::with_capacity(template.len());
    let mut cursor = 0;
    for (start, end, token) in scan_tokens(template) {
        out.push_str(&template[cursor..start]);
        match token {
            Token::SelfRef => out.push_str(scene.name(node)),
            Token::Slot(n) => out.push_str(&slot_name(scene, &slots, n)),
            Token::Slice(a, b) => {
                let names: Vec<String> = slice_range(&slots, a, b)
                    .into_iter()
                    .map(|n| slot_name(scene, &slots, n))
                    .collect();
                out.push_str(&names.join(" "));
            }
        }
        cursor = end;
    }
    out.push_str(&template[cursor..]);
    out
}

/// Does every slot token in the template still resolve to a live node?
fn command_resolves(scene: &Scene, slots: &[NodeId], template: &str) -> bool {
    for (_, _, token) in scan_tokens(template) {
        match token {
            Token::SelfRef => {}
            Token::Slot(n) => {
                if slots.get(n).map(|&id| scene.is_alive(id)) != Some(true) {
                    return false;
                }
            }
            Token::Slice(a, b) => {
                for n in slice_range(slots, a, b) {
                    if slots.get(n).map(|&id| scene.is_alive(id)) != Some(true) {
                        return false;
                    }
                }
            }
        }
    }
    true
}

/// Strip menu items whose referenced slots no longer resolve, leaving all
/// other items untouched. Used after bulk deletion to keep menus
/// consistent.
pub fn scrub(scene: &mut Scene, node: NodeId) {
    let slots = connections(scene, node);
    let keep: Vec<bool> = items(scene, node)
        .iter()
        .map(|item| command_resolves(scene, &slots, &item.command))
        .collect();
    let mut idx = 0;
    retain_items(scene, node, |_| {
        let k = keep[idx];
        idx += 1;
        k
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::NodeKind;

    fn scene_with_connections() -> (Scene, NodeId, NodeId, NodeId) {
        let mut scene = Scene::new();
        let s = scene.spawn(NodeKind::Control, "S");
        let a = scene.spawn(NodeKind::Transform, "A");
        let b = scene.spawn(NodeKind::Transform, "B");
        add_connection(&mut scene, s, a);
        add_connection(&mut scene, s, b);
        (scene, s, a, b)
    }

    #[test]
    fn test_add_connection_dedupes() {
        let (mut scene, s, a, _) = scene_with_connections();
        assert_eq!(add_connection(&mut scene, s, a), 0);
        assert_eq!(connections(&scene, s).len(), 2);
    }

    #[test]
    fn test_resolve_self_and_slots() {
        let (scene, s, _, _) = scene_with_connections();
        assert_eq!(
            resolve(&scene, s, "#.visibility %0.sel"),
            "S.visibility A.sel"
        );
        assert_eq!(resolve(&scene, s, "select %1"), "select B");
    }

    #[test]
    fn test_resolve_survives_rename() {
        let (mut scene, s, a, _) = scene_with_connections();
        scene.rename(a, "Arm");
        assert_eq!(resolve(&scene, s, "select %0"), "select Arm");
    }

    #[test]
    fn test_resolve_slice() {
        let (scene, s, _, _) = scene_with_connections();
        assert_eq!(resolve(&scene, s, "select @0,1"), "select A B");
        assert_eq!(resolve(&scene, s, "select @0,-1"), "select A B");
    }

    #[test]
    fn test_dangling_token_yields_marker() {
        let (mut scene, s, a, _) = scene_with_connections();
        scene.delete(a);
        assert_eq!(
            resolve(&scene, s, "select %0"),
            format!("select {}", INVALID_MARKER)
        );
        assert_eq!(
            resolve(&scene, s, "select %7"),
            format!("select {}", INVALID_MARKER)
        );
    }

    #[test]
    fn test_scrub_removes_only_broken_lines() {
        let (mut scene, s, _, b) = scene_with_connections();
        add_menu_item(&mut scene, s, "show", "#.visibility %0.sel");
        add_menu_item(&mut scene, s, "pick b", "select %1");
        add_menu_item(&mut scene, s, "plain", "reset #");

        scene.delete(b);
        scrub(&mut scene, s);

        let remaining = items(&scene, s);
        assert_eq!(remaining.len(), 2);
        // Survivors are byte-identical
        assert_eq!(remaining[0].command, "#.visibility %0.sel");
        assert_eq!(remaining[1].command, "reset #");
    }
}
