// Copyright 2018-2022 Clemens Lutz
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.


use crate::utils::CachePadded;
use std::sync::atomic::{AtomicU32, Ordering};

/// Hands out disjoint windows of an input to worker groups.
///
/// The cursor is shared by all worker groups of a grid. Each group reserves
/// the next window with a single fetch-and-add, regardless of how many lanes
/// the group has. Thus, windows never overlap between groups.
///
/// The cursor only moves forward. Once it passes the end of the input, all
/// later windows are empty.
#[derive(Debug, Default)]
pub struct WindowCursor {
    offset: CachePadded<AtomicU32>,
}

impl WindowCursor {
    pub fn new(offset: u32) -> Self {
        Self {
            offset: CachePadded::new(AtomicU32::new(offset)),
        }
    }

    /// Reserves a window of `len` items and returns its first position.
    pub fn dispatch(&self, len: u32) -> u32 {
        self.offset.fetch_add(len, Ordering::SeqCst)
    }

    /// Returns the next position that will be dispatched.
    pub fn position(&self) -> u32 {
        self.offset.load(Ordering::SeqCst)
    }

    /// Moves the cursor back to `offset`.
    ///
    /// Must only be called while no kernel is running, e.g., before launching
    /// a new pass over a different input.
    pub fn reset(&mut self, offset: u32) {
        *self.offset.get_mut() = offset;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rayon::prelude::*;
    use std::collections::HashSet;

    #[test]
    fn windows_are_disjoint() {
        const WINDOW: u32 = 32;
        let cursor = WindowCursor::new(0);

        let starts: Vec<u32> = (0..1000)
            .into_par_iter()
            .map(|_| cursor.dispatch(WINDOW))
            .collect();

        let unique: HashSet<_> = starts.iter().cloned().collect();
        assert_eq!(unique.len(), starts.len());
        assert!(starts.iter().all(|s| s % WINDOW == 0));
        assert_eq!(cursor.position(), 1000 * WINDOW);
    }

    #[test]
    fn reset_rewinds() {
        let mut cursor = WindowCursor::new(5);
        assert_eq!(cursor.dispatch(3), 5);
        cursor.reset(0);
        assert_eq!(cursor.dispatch(3), 0);
    }
}
