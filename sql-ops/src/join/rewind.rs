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


use crate::join::funcs::GpuJoinFuncs;
use crate::join::group::{Flow, GroupFrame};

impl<'k, F> GroupFrame<'k, F>
where
    F: GpuJoinFuncs,
{
    /// Rewinds the pseudo-stack, starting at `depth`.
    ///
    /// All combinations of a depth are consumed when the rewind reaches it,
    /// so its cursors restart at zero. The rewind continues at the next
    /// shallower depth, until it reaches a depth with lanes still walking a
    /// hash chain, a depth whose input has unread combinations, or the base
    /// depth. The traversal state of all deeper depths is reset.
    pub(crate) fn rewind_stack(&mut self, depth: u32) -> Flow {
        let base_depth = self.shared.base_depth;
        let mut depth = depth.max(base_depth);

        let shared = &mut self.shared;
        loop {
            let d = depth as usize;
            shared.read_pos[d] = 0;
            shared.write_pos[d] = 0;

            if shared.wip_count[d] > 0 || depth == base_depth {
                break;
            }
            if shared.read_pos[d - 1] < shared.write_pos[d - 1] {
                break;
            }
            depth -= 1;
        }

        self.reset_lanes_below(depth);

        if self.shared.scan_done && depth == base_depth {
            Flow::Complete
        } else {
            Flow::Depth(depth)
        }
    }
}
