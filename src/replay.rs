use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::fs::File;
use std::path::Path;

use crate::rng::SimRng;

// =============================================================================
// Experience Replay Buffer
// =============================================================================

/// One environment step. `state` and `next_state` are owned copies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transition {
    pub state: Vec<f32>,
    pub action: usize,
    pub reward: f32,
    pub next_state: Vec<f32>,
    pub done: bool,
}

/// Fixed-capacity FIFO of transitions. Once full, each push evicts the
/// oldest entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplayBuffer {
    buffer: VecDeque<Transition>,
    capacity: usize,
}

impl ReplayBuffer {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            buffer: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn push(&mut self, t: Transition) {
        if self.buffer.len() >= self.capacity {
            self.buffer.pop_front();
        }
        self.buffer.push_back(t);
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.buffer.clear();
    }

    /// Oldest to newest.
    pub fn iter(&self) -> impl Iterator<Item = &Transition> {
        self.buffer.iter()
    }

    pub fn to_vec(&self) -> Vec<Transition> {
        self.buffer.iter().cloned().collect()
    }

    /// Draw `batch_size` transitions uniformly with replacement; duplicates
    /// are expected. An empty buffer yields an empty batch.
    pub fn sample(&self, batch_size: usize, rng: &mut SimRng) -> Vec<&Transition> {
        let len = self.buffer.len();
        if len == 0 {
            return Vec::new();
        }
        (0..batch_size.max(1))
            .filter_map(|_| self.buffer.get(rng.index(len)))
            .collect()
    }

    /// Change capacity, keeping the newest entries in their original order.
    pub fn resize(&mut self, capacity: usize) {
        let capacity = capacity.max(1);
        if capacity == self.capacity {
            return;
        }
        let excess = self.buffer.len().saturating_sub(capacity);
        self.buffer.drain(..excess);
        self.capacity = capacity;
        self.buffer.shrink_to(capacity);
        self.buffer.reserve_exact(capacity - self.buffer.len());
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let path = path.as_ref();
        let file = File::create(path).with_context(|| format!("create {}", path.display()))?;
        let writer = std::io::BufWriter::new(file);
        bincode::serialize_into(writer, self)?;
        Ok(())
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).with_context(|| format!("open {}", path.display()))?;
        let reader = std::io::BufReader::new(file);
        let mut replay: ReplayBuffer = bincode::deserialize_from(reader)
            .with_context(|| format!("decode replay buffer {}", path.display()))?;
        replay.capacity = replay.capacity.max(1);
        let excess = replay.buffer.len().saturating_sub(replay.capacity);
        replay.buffer.drain(..excess);
        Ok(replay)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tagged(tag: f32) -> Transition {
        Transition {
            state: vec![tag],
            action: 0,
            reward: tag,
            next_state: vec![tag + 1.0],
            done: false,
        }
    }

    fn rewards(replay: &ReplayBuffer) -> Vec<f32> {
        replay.iter().map(|t| t.reward).collect()
    }

    #[test]
    fn overflow_keeps_newest_in_order() {
        let mut replay = ReplayBuffer::new(3);
        for i in 0..5 {
            replay.push(tagged(i as f32));
        }
        assert_eq!(replay.len(), 3);
        assert_eq!(rewards(&replay), vec![2.0, 3.0, 4.0]);
    }

    #[test]
    fn oversized_sample_draws_only_stored_items() {
        let mut replay = ReplayBuffer::new(3);
        for i in 0..5 {
            replay.push(tagged(i as f32));
        }
        let mut rng = SimRng::new(5);
        let batch = replay.sample(10, &mut rng);
        assert_eq!(batch.len(), 10);
        assert!(batch.iter().all(|t| (2.0..=4.0).contains(&t.reward)));
    }

    #[test]
    fn empty_sample_is_empty() {
        let replay = ReplayBuffer::new(4);
        let mut rng = SimRng::new(5);
        assert!(replay.sample(8, &mut rng).is_empty());
    }

    #[test]
    fn shrink_keeps_newest_and_grow_keeps_all() {
        let mut replay = ReplayBuffer::new(10);
        for i in 0..8 {
            replay.push(tagged(i as f32));
        }
        replay.resize(5);
        assert_eq!(replay.capacity(), 5);
        assert_eq!(rewards(&replay), vec![3.0, 4.0, 5.0, 6.0, 7.0]);

        replay.resize(7);
        replay.push(tagged(8.0));
        replay.push(tagged(9.0));
        replay.push(tagged(10.0));
        assert_eq!(rewards(&replay), vec![4.0, 5.0, 6.0, 7.0, 8.0, 9.0, 10.0]);
    }

    #[test]
    fn zero_capacity_is_floored() {
        let mut replay = ReplayBuffer::new(0);
        replay.push(tagged(1.0));
        replay.push(tagged(2.0));
        assert_eq!(replay.capacity(), 1);
        assert_eq!(rewards(&replay), vec![2.0]);
    }

    #[test]
    fn save_load_round_trip() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("replay.bin");
        let mut replay = ReplayBuffer::new(4);
        for i in 0..6 {
            replay.push(tagged(i as f32));
        }
        replay.save(&path).expect("save");
        let loaded = ReplayBuffer::load(&path).expect("load");
        assert_eq!(loaded.capacity(), 4);
        assert_eq!(loaded.to_vec(), replay.to_vec());
    }
}
