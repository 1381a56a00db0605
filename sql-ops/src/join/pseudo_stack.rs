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


use data_store::RowRef;

/// The per-group working storage of partial join combinations.
///
/// Depth `d` holds up to `nrooms` records of `d + 1` row references, one per
/// relation joined so far. Records are addressed by their index within the
/// depth; the stride of each depth is fixed when the stack is allocated.
#[derive(Clone, Debug)]
pub struct PseudoStack {
    nrooms: u32,
    depths: Vec<Vec<RowRef>>,
}

impl PseudoStack {
    /// Allocates the stack of a join with `nrels` inner relations.
    pub fn new(nrels: u32, nrooms: u32) -> Self {
        let depths = (0..=nrels as usize)
            .map(|depth| vec![RowRef::NULL; nrooms as usize * (depth + 1)])
            .collect();

        Self { nrooms, depths }
    }

    pub fn nrooms(&self) -> u32 {
        self.nrooms
    }

    /// The number of depths, i.e., inner relations plus one.
    pub fn ndepths(&self) -> u32 {
        self.depths.len() as u32
    }

    /// Returns record `index` of `depth`.
    pub fn record(&self, depth: u32, index: u32) -> Option<&[RowRef]> {
        let stride = depth as usize + 1;
        let begin = index as usize * stride;
        self.depths
            .get(depth as usize)
            .and_then(|arena| arena.get(begin..begin + stride))
    }

    /// Writes record `index` of `depth`.
    ///
    /// The record is the record `outer` of `depth - 1` extended by `row`. If
    /// `outer` is `None`, all shallower references are null. Returns `false`
    /// if either record is out of bounds.
    pub fn write_record(&mut self, depth: u32, index: u32, outer: Option<u32>, row: RowRef) -> bool {
        let depth = depth as usize;
        if depth >= self.depths.len() {
            return false;
        }

        let (shallower, deeper) = self.depths.split_at_mut(depth);
        let begin = index as usize * (depth + 1);
        let record = match deeper[0].get_mut(begin..begin + depth + 1) {
            Some(r) => r,
            None => return false,
        };

        match (outer, shallower.last()) {
            (Some(outer), Some(prev)) => {
                let prev_begin = outer as usize * depth;
                match prev.get(prev_begin..prev_begin + depth) {
                    Some(prefix) => record[..depth].copy_from_slice(prefix),
                    None => return false,
                }
            }
            _ => record[..depth].iter_mut().for_each(|r| *r = RowRef::NULL),
        }
        record[depth] = row;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extends_outer_record() {
        let mut pstack = PseudoStack::new(2, 4);
        assert!(pstack.write_record(0, 1, None, RowRef::from_index(10)));
        assert!(pstack.write_record(1, 3, Some(1), RowRef::from_index(20)));
        assert!(pstack.write_record(2, 0, Some(3), RowRef::from_index(30)));

        assert_eq!(
            pstack.record(2, 0),
            Some(
                &[
                    RowRef::from_index(10),
                    RowRef::from_index(20),
                    RowRef::from_index(30)
                ][..]
            )
        );
    }

    #[test]
    fn null_prefix() {
        let mut pstack = PseudoStack::new(2, 4);
        assert!(pstack.write_record(1, 0, Some(0), RowRef::from_index(1)));
        assert!(pstack.write_record(2, 0, None, RowRef::from_index(5)));
        assert_eq!(
            pstack.record(2, 0),
            Some(&[RowRef::NULL, RowRef::NULL, RowRef::from_index(5)][..])
        );
    }

    #[test]
    fn rejects_out_of_bounds() {
        let mut pstack = PseudoStack::new(1, 2);
        assert!(!pstack.write_record(0, 2, None, RowRef::from_index(0)));
        assert!(!pstack.write_record(1, 0, Some(2), RowRef::from_index(0)));
        assert!(!pstack.write_record(2, 0, None, RowRef::from_index(0)));
        assert!(pstack.record(1, 2).is_none());
    }
}
