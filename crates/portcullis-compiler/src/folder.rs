//! Rooted folder tree with root-to-node path computation.

use std::collections::{HashMap, HashSet, VecDeque};

use indexmap::IndexMap;

use crate::entity::{Entity, EntityType};
use crate::error::CompileError;

/// Folder entities arranged as a single rooted tree.
///
/// Folders are held parent-first (breadth-first from the root, siblings in
/// input order). Paths are the `/`-joined folder names below the root; the
/// root's path is empty.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FolderTree {
    folders: IndexMap<String, Entity>,
    paths: HashMap<String, String>,
}

impl FolderTree {
    /// Build the tree, checking there is exactly one root, every parent exists
    /// and every folder is reachable from the root.
    pub fn build<'a>(folders: impl IntoIterator<Item = &'a Entity>) -> Result<Self, CompileError> {
        let mut by_id: IndexMap<&str, &Entity> = IndexMap::new();
        for folder in folders {
            if folder.entity_type != EntityType::Folder {
                return Err(CompileError::InvalidFolderTree(format!(
                    "'{}' is a {}, not a folder",
                    folder.name, folder.entity_type
                )));
            }
            if by_id.insert(folder.id.as_str(), folder).is_some() {
                return Err(CompileError::InvalidFolderTree(format!(
                    "duplicate folder id '{}'",
                    folder.id
                )));
            }
        }
        if by_id.is_empty() {
            return Ok(Self::default());
        }

        let mut roots = Vec::new();
        let mut children: HashMap<&str, Vec<&Entity>> = HashMap::new();
        for folder in by_id.values() {
            match folder.folder_id.as_deref() {
                None => roots.push(*folder),
                Some(parent) if by_id.contains_key(parent) => {
                    children.entry(parent).or_default().push(*folder)
                }
                Some(parent) => {
                    return Err(CompileError::InvalidFolderTree(format!(
                        "folder '{}' has unknown parent '{}'",
                        folder.name, parent
                    )))
                }
            }
        }
        let root = match roots.as_slice() {
            [root] => *root,
            [] => {
                return Err(CompileError::InvalidFolderTree(
                    "no root folder (every folder has a parent)".to_string(),
                ))
            }
            _ => {
                return Err(CompileError::InvalidFolderTree(format!(
                    "multiple root folders: {}",
                    roots.iter().map(|f| f.name.as_str()).collect::<Vec<_>>().join(", ")
                )))
            }
        };

        let mut tree = Self::default();
        let mut queue = VecDeque::from([(root, String::new())]);
        while let Some((folder, path)) = queue.pop_front() {
            for child in children.get(folder.id.as_str()).into_iter().flatten() {
                let child_path = if path.is_empty() {
                    child.name.clone()
                } else {
                    format!("{}/{}", path, child.name)
                };
                queue.push_back((*child, child_path));
            }
            tree.paths.insert(folder.id.clone(), path);
            tree.folders.insert(folder.id.clone(), folder.clone());
        }

        if tree.folders.len() != by_id.len() {
            let reached: HashSet<&str> = tree.folders.keys().map(String::as_str).collect();
            let unreachable: Vec<_> = by_id
                .values()
                .filter(|f| !reached.contains(f.id.as_str()))
                .map(|f| f.name.as_str())
                .collect();
            return Err(CompileError::InvalidFolderTree(format!(
                "folders not reachable from the root (parent cycle): {}",
                unreachable.join(", ")
            )));
        }

        Ok(tree)
    }

    pub fn root(&self) -> Option<&Entity> {
        self.folders.first().map(|(_, f)| f)
    }

    pub fn get(&self, id: &str) -> Option<&Entity> {
        self.folders.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.folders.contains_key(id)
    }

    /// Root-to-node path, e.g. `a/b`. Empty for the root.
    pub fn path(&self, id: &str) -> Option<&str> {
        self.paths.get(id).map(String::as_str)
    }

    /// Path in scope syntax, e.g. `/a/b`. `/` for the root.
    pub fn scope_path(&self, id: &str) -> Option<String> {
        self.path(id).map(|p| format!("/{}", p))
    }

    /// Folders, parent-first.
    pub fn iter(&self) -> impl Iterator<Item = &Entity> + '_ {
        self.folders.values()
    }

    pub fn len(&self) -> usize {
        self.folders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.folders.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn folder(id: &str, name: &str, parent: Option<&str>) -> Entity {
        let f = Entity::new(EntityType::Folder, id, name);
        match parent {
            Some(p) => f.in_folder(p),
            None => f,
        }
    }

    #[test]
    fn computes_paths_parent_first() {
        let folders = vec![
            folder("c", "c", Some("b")),
            folder("root", "Root Node", None),
            folder("b", "b", Some("a")),
            folder("a", "a", Some("root")),
        ];
        let tree = FolderTree::build(&folders).unwrap();

        assert_eq!(tree.root().unwrap().id, "root");
        assert_eq!(tree.path("root"), Some(""));
        assert_eq!(tree.path("c"), Some("a/b/c"));
        assert_eq!(tree.scope_path("root").as_deref(), Some("/"));
        assert_eq!(tree.scope_path("b").as_deref(), Some("/a/b"));
        let order: Vec<_> = tree.iter().map(|f| f.id.as_str()).collect();
        assert_eq!(order, vec!["root", "a", "b", "c"]);
    }

    #[test]
    fn empty_set_is_an_empty_tree() {
        let tree = FolderTree::build(std::iter::empty()).unwrap();
        assert!(tree.is_empty());
        assert!(tree.root().is_none());
    }

    #[test]
    fn rejects_multiple_roots() {
        let folders = vec![folder("r1", "one", None), folder("r2", "two", None)];
        let err = FolderTree::build(&folders).unwrap_err();
        assert!(err.to_string().contains("multiple root folders"));
    }

    #[test]
    fn rejects_unknown_parent() {
        let folders = vec![folder("r", "root", None), folder("a", "a", Some("missing"))];
        let err = FolderTree::build(&folders).unwrap_err();
        assert!(err.to_string().contains("unknown parent"));
    }

    #[test]
    fn rejects_parent_cycles() {
        let folders = vec![
            folder("r", "root", None),
            folder("a", "a", Some("b")),
            folder("b", "b", Some("a")),
        ];
        let err = FolderTree::build(&folders).unwrap_err();
        assert!(err.to_string().contains("E2007"));
        assert!(err.to_string().contains("parent cycle"));
    }
}
