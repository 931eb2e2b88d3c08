//! Merge strategies injected per query.
//!
//! A query kind supplies three strategies: how to fold one partition's answer
//! into the accumulated one ([`Merger`]), whether the accumulated answer is
//! already enough ([`Evaluator`]), and how to finalize it ([`Done`]). Plain
//! closures implement all three. Each strategy receives the query's
//! [`SolutionLog`] so it can record why it merged or stopped.

use std::collections::HashSet;
use std::hash::Hash;

use crate::log::SolutionLog;

/// Folds the next partition's answer into the accumulated one.
///
/// Not commutative: `accumulated` always comes from newer partitions than `next`.
pub trait Merger<A>: Send + Sync {
    fn merge(&self, accumulated: Option<A>, next: A, log: &SolutionLog) -> A;
}

impl<A, F> Merger<A> for F
where
    F: Fn(Option<A>, A, &SolutionLog) -> A + Send + Sync,
{
    fn merge(&self, accumulated: Option<A>, next: A, log: &SolutionLog) -> A {
        self(accumulated, next, log)
    }
}

/// Decides whether the sweep may stop early
pub trait Evaluator<A>: Send + Sync {
    fn is_done(&self, merged: &A, log: &SolutionLog) -> bool;
}

impl<A, F> Evaluator<A> for F
where
    F: Fn(&A, &SolutionLog) -> bool + Send + Sync,
{
    fn is_done(&self, merged: &A, log: &SolutionLog) -> bool {
        self(merged, log)
    }
}

/// Finalizes the merged answer; may supply a default when nothing answered
pub trait Done<A>: Send + Sync {
    fn finish(&self, merged: Option<A>, log: &SolutionLog) -> Option<A>;
}

impl<A, F> Done<A> for F
where
    F: Fn(Option<A>, &SolutionLog) -> Option<A> + Send + Sync,
{
    fn finish(&self, merged: Option<A>, log: &SolutionLog) -> Option<A> {
        self(merged, log)
    }
}

/// Order-preserving distinct union of list answers.
///
/// On a key conflict the entry already accumulated (from a fresher partition) wins.
pub struct UnionMerger<K> {
    key: K,
}

impl<K> UnionMerger<K> {
    pub fn by_key(key: K) -> Self {
        Self { key }
    }
}

impl<T, Key, K> Merger<Vec<T>> for UnionMerger<K>
where
    T: Send,
    Key: Eq + Hash,
    K: Fn(&T) -> Key + Send + Sync,
{
    fn merge(&self, accumulated: Option<Vec<T>>, next: Vec<T>, log: &SolutionLog) -> Vec<T> {
        let mut merged = accumulated.unwrap_or_default();
        let mut seen: HashSet<Key> = merged.iter().map(|item| (self.key)(item)).collect();
        let offered = next.len();
        let before = merged.len();
        for item in next {
            if seen.insert((self.key)(&item)) {
                merged.push(item);
            }
        }
        let duplicates = offered - (merged.len() - before);
        if duplicates > 0 {
            log.record(format!("union dropped {} entries already seen in newer partitions", duplicates));
        }
        merged
    }
}

/// Done once at least `limit` results have been merged
#[derive(Debug, Clone, Copy)]
pub struct LimitEvaluator {
    limit: usize,
}

impl LimitEvaluator {
    pub fn new(limit: usize) -> Self {
        Self { limit }
    }
}

impl<T> Evaluator<Vec<T>> for LimitEvaluator {
    fn is_done(&self, merged: &Vec<T>, log: &SolutionLog) -> bool {
        let done = merged.len() >= self.limit;
        if done {
            log.record(format!("{} results reach limit {}", merged.len(), self.limit));
        }
        done
    }
}

/// Passes the merged answer through, or `default` when nothing answered
#[derive(Debug, Clone)]
pub struct OrDefault<A> {
    default: A,
}

impl<A> OrDefault<A> {
    pub fn new(default: A) -> Self {
        Self { default }
    }
}

impl<A: Clone + Send + Sync> Done<A> for OrDefault<A> {
    fn finish(&self, merged: Option<A>, log: &SolutionLog) -> Option<A> {
        if merged.is_some() {
            return merged;
        }
        log.record("no partition answered, using default");
        Some(self.default.clone())
    }
}
