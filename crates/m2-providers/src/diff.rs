//! Edit scripts between two ordered snapshots of identity-bearing elements.

use std::collections::HashMap;

use m2_types::models::{Chat, FriendsRequest, Message};

/// An element with a stable identity and a separate notion of content
/// equality.
pub trait Differentiable {
    fn difference_id(&self) -> i64;
    fn is_content_equal(&self, other: &Self) -> bool;
}

impl Differentiable for Chat {
    fn difference_id(&self) -> i64 {
        self.id
    }

    fn is_content_equal(&self, other: &Self) -> bool {
        self == other
    }
}

impl Differentiable for FriendsRequest {
    fn difference_id(&self) -> i64 {
        self.id
    }

    fn is_content_equal(&self, other: &Self) -> bool {
        self.id == other.id && self.state == other.state
    }
}

impl Differentiable for Message {
    fn difference_id(&self) -> i64 {
        self.id
    }

    fn is_content_equal(&self, other: &Self) -> bool {
        self == other
    }
}

/// Changes that turn `old` into `new`.
///
/// `deleted` holds indices into `old`; `inserted` and `updated` hold indices
/// into `new`; `moved` holds `(old, new)` index pairs. Elements on the
/// longest run that kept its relative order are not reported as moved.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Changeset {
    pub deleted: Vec<usize>,
    pub inserted: Vec<usize>,
    pub updated: Vec<usize>,
    pub moved: Vec<(usize, usize)>,
}

impl Changeset {
    pub fn compute<T: Differentiable>(old: &[T], new: &[T]) -> Self {
        // First occurrence wins; later duplicates count as plain deletes/inserts.
        let mut old_index: HashMap<i64, usize> = HashMap::with_capacity(old.len());
        for (i, element) in old.iter().enumerate() {
            old_index.entry(element.difference_id()).or_insert(i);
        }
        let mut new_index: HashMap<i64, usize> = HashMap::with_capacity(new.len());
        for (i, element) in new.iter().enumerate() {
            new_index.entry(element.difference_id()).or_insert(i);
        }

        let mut changeset = Changeset::default();

        for (i, element) in old.iter().enumerate() {
            let id = element.difference_id();
            if old_index.get(&id) != Some(&i) || !new_index.contains_key(&id) {
                changeset.deleted.push(i);
            }
        }

        // Surviving elements as (old, new) pairs in new order
        let mut kept = Vec::new();
        for (j, element) in new.iter().enumerate() {
            let id = element.difference_id();
            if new_index.get(&id) != Some(&j) {
                changeset.inserted.push(j);
                continue;
            }
            match old_index.get(&id) {
                Some(&i) => {
                    if !old[i].is_content_equal(element) {
                        changeset.updated.push(j);
                    }
                    kept.push((i, j));
                }
                None => changeset.inserted.push(j),
            }
        }

        let old_positions: Vec<usize> = kept.iter().map(|(i, _)| *i).collect();
        let stable = longest_increasing_run(&old_positions);
        let mut stable_iter = stable.iter().peekable();
        for (k, pair) in kept.iter().enumerate() {
            if stable_iter.peek() == Some(&&k) {
                stable_iter.next();
            } else {
                changeset.moved.push(*pair);
            }
        }

        changeset
    }

    pub fn is_empty(&self) -> bool {
        self.deleted.is_empty()
            && self.inserted.is_empty()
            && self.updated.is_empty()
            && self.moved.is_empty()
    }
}

/// Positions (ascending) of one longest strictly increasing subsequence.
fn longest_increasing_run(values: &[usize]) -> Vec<usize> {
    // tails[k]: index into `values` of the smallest tail of a run of length k + 1
    let mut tails: Vec<usize> = Vec::new();
    let mut previous: Vec<Option<usize>> = vec![None; values.len()];

    for (i, value) in values.iter().enumerate() {
        let slot = tails.partition_point(|&t| values[t] < *value);
        if slot > 0 {
            previous[i] = Some(tails[slot - 1]);
        }
        if slot == tails.len() {
            tails.push(i);
        } else {
            tails[slot] = i;
        }
    }

    let mut run = Vec::with_capacity(tails.len());
    let mut cursor = tails.last().copied();
    while let Some(i) = cursor {
        run.push(i);
        cursor = previous[i];
    }
    run.reverse();
    run
}
