//! In-memory album forest.
//!
//! Albums are arena nodes keyed by id with explicit parent and child index
//! maps. Removing a subtree is an index operation; no node keeps a reference
//! to another.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::models::Album;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlbumNode {
    pub album_id: i64,
    pub parent: Option<i64>,
    pub path: String,
    pub title: String,
}

#[derive(Debug, Default, Clone)]
pub struct AlbumForest {
    nodes: HashMap<i64, AlbumNode>,
    by_path: HashMap<String, i64>,
    children: HashMap<i64, Vec<i64>>,
}

impl AlbumForest {
    pub fn from_albums(albums: impl IntoIterator<Item = Album>) -> Self {
        let mut forest = Self::default();
        for album in albums {
            forest.insert(AlbumNode {
                album_id: album.album_id,
                parent: album.parent_album_id,
                path: album.path,
                title: album.title,
            });
        }
        forest
    }

    pub fn insert(&mut self, node: AlbumNode) {
        if let Some(parent) = node.parent {
            self.children.entry(parent).or_default().push(node.album_id);
        }
        self.by_path.insert(node.path.clone(), node.album_id);
        self.nodes.insert(node.album_id, node);
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, album_id: i64) -> Option<&AlbumNode> {
        self.nodes.get(&album_id)
    }

    pub fn by_path(&self, path: &str) -> Option<&AlbumNode> {
        self.by_path.get(path).and_then(|id| self.nodes.get(id))
    }

    pub fn children(&self, album_id: i64) -> &[i64] {
        self.children
            .get(&album_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// All albums below `album_id`, breadth first.
    pub fn descendants(&self, album_id: i64) -> Vec<i64> {
        let mut out = Vec::new();
        let mut queue: VecDeque<i64> = self.children(album_id).iter().copied().collect();
        while let Some(id) = queue.pop_front() {
            out.push(id);
            queue.extend(self.children(id).iter().copied());
        }
        out
    }

    /// Remove `album_id` and its descendants. Returns every removed id.
    pub fn remove_subtree(&mut self, album_id: i64) -> Vec<i64> {
        if !self.nodes.contains_key(&album_id) {
            return Vec::new();
        }
        let mut removed = vec![album_id];
        removed.extend(self.descendants(album_id));

        if let Some(parent) = self.nodes.get(&album_id).and_then(|n| n.parent) {
            if let Some(siblings) = self.children.get_mut(&parent) {
                siblings.retain(|id| *id != album_id);
            }
        }
        for id in &removed {
            if let Some(node) = self.nodes.remove(id) {
                self.by_path.remove(&node.path);
            }
            self.children.remove(id);
        }
        removed
    }

    /// Unseen albums whose parent was seen (or that have no parent). Deleting
    /// these covers every unseen album.
    pub fn topmost_unseen(&self, seen: &HashSet<i64>) -> Vec<i64> {
        let mut out: Vec<i64> = self
            .nodes
            .values()
            .filter(|n| !seen.contains(&n.album_id))
            .filter(|n| match n.parent {
                Some(parent) => seen.contains(&parent) || !self.nodes.contains_key(&parent),
                None => true,
            })
            .map(|n| n.album_id)
            .collect();
        out.sort_unstable();
        out
    }

    /// Whether `album_id` is `ancestor` or lies below it.
    pub fn is_within(&self, album_id: i64, ancestor: i64) -> bool {
        let mut current = Some(album_id);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.nodes.get(&id).and_then(|n| n.parent);
        }
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: i64, parent: Option<i64>, path: &str) -> AlbumNode {
        AlbumNode {
            album_id: id,
            parent,
            path: path.to_string(),
            title: path.rsplit('/').next().unwrap_or(path).to_string(),
        }
    }

    fn sample() -> AlbumForest {
        let mut forest = AlbumForest::default();
        forest.insert(node(1, None, "/p"));
        forest.insert(node(2, Some(1), "/p/a"));
        forest.insert(node(3, Some(2), "/p/a/b"));
        forest.insert(node(4, Some(1), "/p/c"));
        forest
    }

    #[test]
    fn test_descendants_and_paths() {
        let forest = sample();
        assert_eq!(forest.by_path("/p/a/b").map(|n| n.album_id), Some(3));
        let mut d = forest.descendants(1);
        d.sort();
        assert_eq!(d, vec![2, 3, 4]);
        assert!(forest.is_within(3, 1));
        assert!(!forest.is_within(4, 2));
    }

    #[test]
    fn test_remove_subtree() {
        let mut forest = sample();
        let mut removed = forest.remove_subtree(2);
        removed.sort();
        assert_eq!(removed, vec![2, 3]);
        assert_eq!(forest.len(), 2);
        assert!(forest.by_path("/p/a/b").is_none());
        assert_eq!(forest.children(1), &[4]);
        assert!(forest.remove_subtree(2).is_empty());
    }

    #[test]
    fn test_topmost_unseen() {
        let forest = sample();
        let seen: HashSet<i64> = [1, 4].into_iter().collect();
        assert_eq!(forest.topmost_unseen(&seen), vec![2]);

        let none = HashSet::new();
        assert_eq!(forest.topmost_unseen(&none), vec![1]);
    }
}
