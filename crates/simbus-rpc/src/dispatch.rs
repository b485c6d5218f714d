//! Topic-addressed dispatching tree.
//!
//! A concurrent trie keyed by topic segments. Each node owns a `DashMap` of
//! children and at most one handler behind its own lock, so lookups run
//! alongside registration and removal without a tree-wide lock.
//!
//! Paths may be given bare (`sim.step`) or prefixed with the owner's
//! identity, including its group-wide and application-wide broadcast forms;
//! the prefix is stripped before the walk.
//!
//! Locking rules:
//! - `add` descends holding the parent's shard entry while it creates or
//!   visits the child, so a node being populated cannot be pruned.
//! - `remove` takes the handler first, then prunes each emptied node under
//!   its parent's shard lock, terminal first, stopping at the first node
//!   that is still in use.
//! - lookups clone each child `Arc` and release the shard before descending.
//!
//! Locks are always taken parent before child.

use std::fmt;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use simbus_core::{ClientIdentifier, join_topic};

use crate::errors::DispatchError;

struct Node<H> {
    children: DashMap<String, Arc<Node<H>>>,
    handler: RwLock<Option<H>>,
}

impl<H> Node<H> {
    fn new() -> Self {
        Self {
            children: DashMap::new(),
            handler: RwLock::new(None),
        }
    }

    fn child(&self, segment: &str) -> Option<Arc<Self>> {
        self.children.get(segment).map(|c| Arc::clone(c.value()))
    }

    fn is_vacant(&self) -> bool {
        self.handler.read().is_none() && self.children.is_empty()
    }

    fn count(&self) -> usize {
        let own = usize::from(self.handler.read().is_some());
        let children: Vec<Arc<Self>> = self.children.iter().map(|c| Arc::clone(c.value())).collect();
        own + children.iter().map(|c| c.count()).sum::<usize>()
    }
}

/// Concurrent trie mapping topic paths to handlers.
pub struct DispatchingTree<H> {
    owner: ClientIdentifier,
    root: Arc<Node<H>>,
}

impl<H: Clone> DispatchingTree<H> {
    /// Create an empty tree for `owner`.
    pub fn new(owner: ClientIdentifier) -> Self {
        Self {
            owner,
            root: Arc::new(Node::new()),
        }
    }

    /// The identity whose prefix is stripped from paths.
    pub fn owner(&self) -> &ClientIdentifier {
        &self.owner
    }

    /// Attach `handler` at `path`.
    ///
    /// Missing nodes are created. Fails when the path is empty after
    /// stripping the owner prefix, or when the terminal node already has a
    /// handler.
    pub fn add_dispatcher(&self, path: &[String], handler: H) -> Result<(), DispatchError> {
        let relative = self.relative(path);
        if relative.is_empty() {
            return Err(DispatchError::RootPath);
        }
        Self::insert(&self.root, relative, handler)
            .map_err(|()| DispatchError::AlreadyRegistered {
                path: join_topic(relative),
            })
    }

    /// Handler at `path`, if every segment exists and the terminal has one.
    pub fn get_dispatcher(&self, path: &[String]) -> Option<H> {
        let relative = self.relative(path);
        if relative.is_empty() {
            return None;
        }
        let mut node = Arc::clone(&self.root);
        for segment in relative {
            node = node.child(segment)?;
        }
        node.handler.read().clone()
    }

    /// Detach and return the handler at `path`.
    pub fn remove_dispatcher(&self, path: &[String]) -> Option<H> {
        self.remove_dispatcher_if(path, |_| true)
    }

    /// Detach the handler at `path` only when `predicate` holds for it.
    ///
    /// Nodes left without handler and children are pruned, from the
    /// terminal upwards.
    pub fn remove_dispatcher_if(
        &self,
        path: &[String],
        predicate: impl FnOnce(&H) -> bool,
    ) -> Option<H> {
        let relative = self.relative(path);
        let (last, parents) = relative.split_last()?;
        let mut ancestors = vec![Arc::clone(&self.root)];
        for segment in parents {
            let next = ancestors.last()?.child(segment)?;
            ancestors.push(next);
        }
        let terminal = ancestors.last()?.child(last)?;
        let removed = {
            let mut slot = terminal.handler.write();
            if slot.as_ref().is_some_and(predicate) {
                slot.take()
            } else {
                None
            }
        }?;
        drop(terminal);
        for (node, segment) in ancestors.iter().zip(relative).rev() {
            if node.children.remove_if(segment, |_, child| child.is_vacant()).is_none() {
                break;
            }
        }
        Some(removed)
    }

    /// Number of attached handlers.
    pub fn handler_count(&self) -> usize {
        self.root.count()
    }

    /// Whether no handler is attached.
    pub fn is_empty(&self) -> bool {
        self.handler_count() == 0
    }

    fn relative<'p>(&self, path: &'p [String]) -> &'p [String] {
        match self.owner.owned_prefix_len(path) {
            Some(len) => &path[len..],
            None => path,
        }
    }

    // Holds the parent's entry guard across the recursive call.
    fn insert(node: &Node<H>, relative: &[String], handler: H) -> Result<(), ()> {
        let Some((first, rest)) = relative.split_first() else {
            return Err(());
        };
        let child = node
            .children
            .entry(first.clone())
            .or_insert_with(|| Arc::new(Node::new()));
        if rest.is_empty() {
            let mut slot = child.handler.write();
            if slot.is_some() {
                return Err(());
            }
            *slot = Some(handler);
            Ok(())
        } else {
            Self::insert(child.value(), rest, handler)
        }
    }
}

impl<H> fmt::Debug for DispatchingTree<H> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchingTree")
            .field("owner", &self.owner.to_string())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use proptest::prelude::*;
    use std::collections::BTreeSet;
    use std::thread;

    fn owner() -> ClientIdentifier {
        ClientIdentifier::new(["lab"], "sim", "plant", "c1").unwrap()
    }

    fn path(dotted: &str) -> Vec<String> {
        simbus_core::split_topic(dotted)
    }

    fn tree() -> DispatchingTree<u32> {
        DispatchingTree::new(owner())
    }

    #[test]
    fn add_then_get() {
        let tree = tree();
        tree.add_dispatcher(&path("sim.step"), 1).unwrap();
        assert_eq!(tree.get_dispatcher(&path("sim.step")), Some(1));
        assert_eq!(tree.get_dispatcher(&path("sim")), None);
        assert_eq!(tree.get_dispatcher(&path("sim.step.more")), None);
        assert_eq!(tree.get_dispatcher(&path("other")), None);
    }

    #[test]
    fn identity_prefix_is_stripped() {
        let tree = tree();
        tree.add_dispatcher(&path("lab.sim.plant.c1.sim.step"), 7).unwrap();
        assert_eq!(tree.get_dispatcher(&path("sim.step")), Some(7));
        assert_eq!(tree.get_dispatcher(&path("lab.sim.plant._all.sim.step")), Some(7));
        assert_eq!(tree.get_dispatcher(&path("lab.sim._all._all.sim.step")), Some(7));
        assert_eq!(tree.get_dispatcher(&path("lab.sim.plant.c2.sim.step")), None);
    }

    #[test]
    fn root_path_rejected() {
        let tree = tree();
        assert_eq!(tree.add_dispatcher(&[], 1), Err(DispatchError::RootPath));
        assert_eq!(
            tree.add_dispatcher(&path("lab.sim.plant.c1"), 1),
            Err(DispatchError::RootPath)
        );
        assert_eq!(tree.get_dispatcher(&[]), None);
        assert!(tree.is_empty());
    }

    #[test]
    fn occupied_terminal_rejected() {
        let tree = tree();
        tree.add_dispatcher(&path("a.b"), 1).unwrap();
        assert_matches!(
            tree.add_dispatcher(&path("a.b"), 2),
            Err(DispatchError::AlreadyRegistered { path }) if path == "a.b"
        );
        assert_eq!(tree.get_dispatcher(&path("a.b")), Some(1));
    }

    #[test]
    fn interior_and_leaf_handlers_coexist() {
        let tree = tree();
        tree.add_dispatcher(&path("a"), 1).unwrap();
        tree.add_dispatcher(&path("a.b"), 2).unwrap();
        assert_eq!(tree.get_dispatcher(&path("a")), Some(1));
        assert_eq!(tree.get_dispatcher(&path("a.b")), Some(2));
        assert_eq!(tree.handler_count(), 2);
    }

    #[test]
    fn remove_detaches_and_prunes_terminal() {
        let tree = tree();
        tree.add_dispatcher(&path("a.b"), 1).unwrap();
        assert_eq!(tree.remove_dispatcher(&path("a.b")), Some(1));
        assert_eq!(tree.get_dispatcher(&path("a.b")), None);
        assert_eq!(tree.remove_dispatcher(&path("a.b")), None);
        assert_eq!(tree.handler_count(), 0);
        // re-adding after removal works
        tree.add_dispatcher(&path("a.b"), 3).unwrap();
        assert_eq!(tree.get_dispatcher(&path("a.b")), Some(3));
    }

    #[test]
    fn remove_prunes_emptied_ancestors() {
        let tree = tree();
        tree.add_dispatcher(&path("rpc-reply.abc"), 1).unwrap();
        tree.add_dispatcher(&path("sim.step.fast"), 2).unwrap();
        tree.add_dispatcher(&path("sim.tick"), 3).unwrap();

        assert_eq!(tree.remove_dispatcher(&path("rpc-reply.abc")), Some(1));
        assert!(tree.root.child("rpc-reply").is_none());

        assert_eq!(tree.remove_dispatcher(&path("sim.step.fast")), Some(2));
        let sim = tree.root.child("sim").unwrap();
        assert!(sim.child("step").is_none());
        assert!(sim.child("tick").is_some());

        assert_eq!(tree.remove_dispatcher(&path("sim.tick")), Some(3));
        assert!(tree.root.children.is_empty());
        assert!(tree.is_empty());
    }

    #[test]
    fn remove_keeps_node_with_children() {
        let tree = tree();
        tree.add_dispatcher(&path("a"), 1).unwrap();
        tree.add_dispatcher(&path("a.b"), 2).unwrap();
        assert_eq!(tree.remove_dispatcher(&path("a")), Some(1));
        assert_eq!(tree.get_dispatcher(&path("a.b")), Some(2));
    }

    #[test]
    fn conditional_remove() {
        let tree = tree();
        tree.add_dispatcher(&path("a"), 5).unwrap();
        assert_eq!(tree.remove_dispatcher_if(&path("a"), |h| *h == 6), None);
        assert_eq!(tree.get_dispatcher(&path("a")), Some(5));
        assert_eq!(tree.remove_dispatcher_if(&path("a"), |h| *h == 5), Some(5));
        assert_eq!(tree.remove_dispatcher_if(&path("missing.path"), |_| true), None);
    }

    #[test]
    fn concurrent_add_get_remove() {
        let tree = Arc::new(tree());
        let workers: Vec<_> = (0..8u32)
            .map(|w| {
                let tree = Arc::clone(&tree);
                thread::spawn(move || {
                    for i in 0..200u32 {
                        let p = path(&format!("shared.w{w}.n{}", i % 10));
                        if tree.add_dispatcher(&p, i).is_ok() {
                            assert!(tree.get_dispatcher(&p).is_some());
                            assert!(tree.remove_dispatcher(&p).is_some());
                        }
                        let _ = tree.get_dispatcher(&path("shared"));
                    }
                })
            })
            .collect();
        for worker in workers {
            worker.join().unwrap();
        }
        assert_eq!(tree.handler_count(), 0);
        assert!(tree.is_empty());
    }

    proptest! {
        #[test]
        fn every_added_path_is_found_then_removed(
            paths in proptest::collection::btree_set(
                proptest::collection::vec("[a-d]{1,2}", 1..4),
                1..12,
            )
        ) {
            let tree = tree();
            let paths: BTreeSet<Vec<String>> = paths;
            for (i, p) in paths.iter().enumerate() {
                prop_assert!(tree.add_dispatcher(p, u32::try_from(i).unwrap()).is_ok());
            }
            prop_assert_eq!(tree.handler_count(), paths.len());
            for (i, p) in paths.iter().enumerate() {
                prop_assert_eq!(tree.get_dispatcher(p), Some(u32::try_from(i).unwrap()));
            }
            for p in &paths {
                prop_assert!(tree.remove_dispatcher(p).is_some());
            }
            prop_assert_eq!(tree.handler_count(), 0);
            prop_assert!(tree.root.children.is_empty());
        }
    }
}
