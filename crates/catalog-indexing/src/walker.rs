//! Content tree traversal.
//!
//! Objects are located relative to their container: the container sits at
//! path `/` and depth 1, its children at `/{id}` and depth 2, and so on. An
//! object owning a sub-index is yielded by the walk of its parent index but
//! its descendants are not; they belong to the owner's own walk.

use std::collections::VecDeque;

use catalog_search::MappingRegistry;
use catalog_storage::{ObjectStore, StorageError};
use catalog_types::{StoredObject, ROOT_ZOID, TRASHED_ZOID};

use crate::error::IndexingError;

/// Children fetched per store call.
pub const WALK_PAGE_SIZE: usize = 100;

/// Where an object sits inside its container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Location {
    /// Container zoid
    pub container: String,
    pub path: String,
    pub depth: u32,
    pub parent_uuid: Option<String>,
    /// Nearest strict ancestor owning a sub-index
    pub sub_index_owner: Option<String>,
}

impl Location {
    pub fn container_root(container: &StoredObject) -> Self {
        Self {
            container: container.zoid.clone(),
            path: "/".to_string(),
            depth: 1,
            parent_uuid: None,
            sub_index_owner: None,
        }
    }

    /// Location of `child` given its parent's location.
    pub fn child(&self, parent: &StoredObject, parent_owns_index: bool, child: &StoredObject) -> Self {
        let path = if self.path == "/" {
            format!("/{}", child.id)
        } else {
            format!("{}/{}", self.path, child.id)
        };
        Self {
            container: self.container.clone(),
            path,
            depth: self.depth + 1,
            parent_uuid: Some(parent.zoid.clone()),
            sub_index_owner: if parent_owns_index {
                Some(parent.zoid.clone())
            } else {
                self.sub_index_owner.clone()
            },
        }
    }

    pub fn is_container(&self) -> bool {
        self.depth == 1
    }
}

fn owns_sub_index(registry: &MappingRegistry, object: &StoredObject) -> bool {
    registry
        .schema(&object.type_name)
        .is_some_and(|schema| schema.sub_index)
}

/// Rebuild an object's location from its parent chain.
///
/// `None` when the object is the root, sits in the trash, or its chain is
/// broken (a parent was deleted concurrently).
pub fn locate(
    store: &dyn ObjectStore,
    registry: &MappingRegistry,
    object: &StoredObject,
) -> Result<Option<Location>, IndexingError> {
    let mut ids = Vec::new();
    let mut owner: Option<String> = None;
    let mut current = object.clone();

    let container = loop {
        let Some(parent_id) = current.parent_id.clone() else {
            return Ok(None);
        };
        if parent_id == ROOT_ZOID {
            break current;
        }
        if parent_id == TRASHED_ZOID {
            return Ok(None);
        }
        ids.push(current.id.clone());
        let Some(parent) = store.get_object(&parent_id)? else {
            return Ok(None);
        };
        if owner.is_none() && owns_sub_index(registry, &parent) {
            owner = Some(parent.zoid.clone());
        }
        current = parent;
    };

    ids.reverse();
    Ok(Some(Location {
        container: container.zoid.clone(),
        path: format!("/{}", ids.join("/")),
        depth: ids.len() as u32 + 1,
        parent_uuid: object.parent_id.clone().filter(|p| p != ROOT_ZOID),
        sub_index_owner: owner,
    }))
}

/// Location a walk rooted at `root` starts from: the container itself, or
/// a sub-index owner somewhere below one.
pub fn root_location(
    store: &dyn ObjectStore,
    registry: &MappingRegistry,
    root: &StoredObject,
) -> Result<Location, IndexingError> {
    if root.parent_id.as_deref() == Some(ROOT_ZOID) {
        return Ok(Location::container_root(root));
    }
    locate(store, registry, root)?
        .ok_or_else(|| StorageError::NotFound(root.zoid.clone()).into())
}

/// Traversal order of a [`ContentWalker`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkOrder {
    DepthFirst,
    BreadthFirst,
}

#[derive(Debug)]
struct Frame {
    parent: StoredObject,
    location: Location,
    after: Option<String>,
}

/// Streams the descendants of a root object one page of children at a time.
///
/// Only frames (parent, location, page cursor) are kept between pages; the
/// objects themselves are handed to the caller.
pub struct ContentWalker<'a> {
    store: &'a dyn ObjectStore,
    registry: &'a MappingRegistry,
    frames: VecDeque<Frame>,
    order: WalkOrder,
    page_size: usize,
}

impl<'a> ContentWalker<'a> {
    pub fn new(
        store: &'a dyn ObjectStore,
        registry: &'a MappingRegistry,
        root: StoredObject,
        root_location: Location,
    ) -> Self {
        let mut frames = VecDeque::new();
        frames.push_back(Frame {
            parent: root,
            location: root_location,
            after: None,
        });
        Self {
            store,
            registry,
            frames,
            order: WalkOrder::DepthFirst,
            page_size: WALK_PAGE_SIZE,
        }
    }

    pub fn with_order(mut self, order: WalkOrder) -> Self {
        self.order = order;
        self
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    /// Pending frames, reported by memory tracking
    pub fn pending_frames(&self) -> usize {
        self.frames.len()
    }

    /// Next page of `(object, location)` pairs; `None` once exhausted.
    pub fn next_page(&mut self) -> Result<Option<Vec<(StoredObject, Location)>>, IndexingError> {
        loop {
            let frame = match self.order {
                WalkOrder::DepthFirst => self.frames.pop_back(),
                WalkOrder::BreadthFirst => self.frames.pop_front(),
            };
            let Some(frame) = frame else {
                return Ok(None);
            };

            let children =
                self.store
                    .children_page(&frame.parent.zoid, frame.after.as_deref(), self.page_size)?;
            if children.is_empty() {
                continue;
            }

            let parent_owns = owns_sub_index(self.registry, &frame.parent);
            let locations: Vec<Location> = children
                .iter()
                .map(|child| frame.location.child(&frame.parent, parent_owns, child))
                .collect();

            let mut child_frames: Vec<Frame> = children
                .iter()
                .zip(&locations)
                .filter(|(child, _)| child.zoid != TRASHED_ZOID && !owns_sub_index(self.registry, child))
                .map(|(child, location)| Frame {
                    parent: child.clone(),
                    location: location.clone(),
                    after: None,
                })
                .collect();

            let continuation = (children.len() == self.page_size).then(|| Frame {
                after: children.last().map(|c| c.id.clone()),
                parent: frame.parent,
                location: frame.location,
            });

            match self.order {
                WalkOrder::DepthFirst => {
                    // Continuation below the children so subtrees finish first
                    if let Some(cont) = continuation {
                        self.frames.push_back(cont);
                    }
                    child_frames.reverse();
                    self.frames.extend(child_frames);
                }
                WalkOrder::BreadthFirst => {
                    if let Some(cont) = continuation {
                        self.frames.push_front(cont);
                    }
                    self.frames.extend(child_frames);
                }
            }

            return Ok(Some(children.into_iter().zip(locations).collect()));
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use catalog_storage::{Storage, Transaction};
    use catalog_types::ContentSchema;
    use tempfile::TempDir;

    use super::*;

    fn obj(zoid: &str, parent: &str, id: &str, type_name: &str) -> StoredObject {
        StoredObject::new(zoid, Some(parent.to_string()), id, type_name)
    }

    fn seeded_store() -> (Arc<Storage>, TempDir) {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(Storage::open(dir.path()).unwrap());
        let mut txn = Transaction::new();
        txn.put_object(obj("c0", ROOT_ZOID, "c", "Container"));
        txn.put_object(obj("f1", "c0", "folder", "Folder"));
        txn.put_object(obj("i1", "f1", "item-1", "Item"));
        txn.put_object(obj("i2", "f1", "item-2", "Item"));
        txn.put_object(obj("i3", "c0", "item-3", "Item"));
        txn.put_object(obj("a1", "c0", "archive", "Archive"));
        txn.put_object(obj("a2", "a1", "inner", "Item"));
        store.commit(txn).unwrap();
        (store, dir)
    }

    fn registry() -> MappingRegistry {
        MappingRegistry::new(vec![
            ContentSchema::new("Folder"),
            ContentSchema::new("Item"),
            ContentSchema::new("Archive").with_sub_index(true),
        ])
    }

    fn walk_all(walker: &mut ContentWalker<'_>) -> Vec<(String, Location)> {
        let mut out = Vec::new();
        while let Some(page) = walker.next_page().unwrap() {
            out.extend(page.into_iter().map(|(o, l)| (o.zoid, l)));
        }
        out
    }

    #[test]
    fn test_locate_builds_path_and_depth() {
        let (store, _dir) = seeded_store();
        let registry = registry();
        let item = store.get_object("i1").unwrap().unwrap();
        let location = locate(store.as_ref(), &registry, &item).unwrap().unwrap();
        assert_eq!(location.container, "c0");
        assert_eq!(location.path, "/folder/item-1");
        assert_eq!(location.depth, 3);
        assert_eq!(location.parent_uuid.as_deref(), Some("f1"));
        assert!(location.sub_index_owner.is_none());

        let container = store.get_object("c0").unwrap().unwrap();
        let root = locate(store.as_ref(), &registry, &container).unwrap().unwrap();
        assert!(root.is_container());
        assert_eq!(root.path, "/");
    }

    #[test]
    fn test_locate_reports_sub_index_owner() {
        let (store, _dir) = seeded_store();
        let inner = store.get_object("a2").unwrap().unwrap();
        let location = locate(store.as_ref(), &registry(), &inner).unwrap().unwrap();
        assert_eq!(location.sub_index_owner.as_deref(), Some("a1"));
    }

    #[test]
    fn test_locate_trashed_is_none() {
        let (store, _dir) = seeded_store();
        let trashed = obj("t1", TRASHED_ZOID, "gone", "Item");
        assert!(locate(store.as_ref(), &registry(), &trashed).unwrap().is_none());
    }

    #[test]
    fn test_depth_first_walk_prunes_sub_index_content() {
        let (store, _dir) = seeded_store();
        let registry = registry();
        let container = store.get_object("c0").unwrap().unwrap();
        let root = Location::container_root(&container);
        let mut walker = ContentWalker::new(store.as_ref(), &registry, container, root).with_page_size(2);

        let visited = walk_all(&mut walker);
        let zoids: Vec<&str> = visited.iter().map(|(z, _)| z.as_str()).collect();
        // children sorted by id: archive, folder | item-3
        assert_eq!(zoids, vec!["a1", "f1", "i1", "i2", "i3"]);
        let item = visited.iter().find(|(z, _)| z == "i2").unwrap();
        assert_eq!(item.1.path, "/folder/item-2");
    }

    #[test]
    fn test_breadth_first_walk_visits_levels_in_order() {
        let (store, _dir) = seeded_store();
        let registry = registry();
        let container = store.get_object("c0").unwrap().unwrap();
        let root = Location::container_root(&container);
        let mut walker = ContentWalker::new(store.as_ref(), &registry, container, root)
            .with_order(WalkOrder::BreadthFirst);

        let zoids: Vec<String> = walk_all(&mut walker).into_iter().map(|(z, _)| z).collect();
        assert_eq!(zoids, vec!["a1", "f1", "i3", "i1", "i2"]);
    }

    #[test]
    fn test_walk_from_sub_index_owner() {
        let (store, _dir) = seeded_store();
        let registry = registry();
        let owner = store.get_object("a1").unwrap().unwrap();
        let location = locate(store.as_ref(), &registry, &owner).unwrap().unwrap();
        let mut walker = ContentWalker::new(store.as_ref(), &registry, owner, location);

        let visited = walk_all(&mut walker);
        assert_eq!(visited.len(), 1);
        assert_eq!(visited[0].0, "a2");
        assert_eq!(visited[0].1.path, "/archive/inner");
        assert_eq!(visited[0].1.sub_index_owner.as_deref(), Some("a1"));
    }
}
