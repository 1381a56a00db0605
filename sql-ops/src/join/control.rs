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


//! The control object of a multi-relation join.

use crate::error::{ErrorKind, Result};

use data_store::{heap_tuple_size, maxalign, Crc32, Datum};
use once_cell::sync::OnceCell;
use serde_derive::{Deserialize, Serialize};
use simt_runtime::runtime::dims::LaunchDims;
use simt_runtime::runtime::dispatcher::WindowCursor;

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

/// The maximum number of inner relations of a join.
pub const GPUJOIN_MAX_DEPTH: u32 = 20;

/// Fixed part of the control object, without the statistics counters.
const KERN_GPUJOIN_HEAD_LENGTH: u64 = 64;

/// Fixed part of the parameter buffer.
const KERN_PARAMBUF_HEAD_LENGTH: usize = 8;

/// Error codes reported by kernels.
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCode {
    Success = 0,
    /// The destination store is full. Not an error; the kernel must be
    /// resumed with a new destination store.
    Suspend = 1,
    InvalidValue = 2,
    WrongCodeGeneration = 3,
    DataStoreCorruption = 4,
    DataStoreNoSpace = 5,
    OutOfRange = 6,
}

impl ErrorCode {
    pub fn from_u32(code: u32) -> Option<Self> {
        match code {
            0 => Some(ErrorCode::Success),
            1 => Some(ErrorCode::Suspend),
            2 => Some(ErrorCode::InvalidValue),
            3 => Some(ErrorCode::WrongCodeGeneration),
            4 => Some(ErrorCode::DataStoreCorruption),
            5 => Some(ErrorCode::DataStoreNoSpace),
            6 => Some(ErrorCode::OutOfRange),
            _ => None,
        }
    }

    /// True for errors that abort the join.
    pub fn is_fatal(self) -> bool {
        !matches!(self, ErrorCode::Success | ErrorCode::Suspend)
    }

    /// True if an error slot holding `self` accepts `other`.
    ///
    /// The first error is kept, except that a fatal error replaces a suspend.
    fn accepts(self, other: ErrorCode) -> bool {
        match self {
            ErrorCode::Success => true,
            ErrorCode::Suspend => other.is_fatal(),
            _ => false,
        }
    }
}

/// The error slot of the control object, written back by all groups.
#[derive(Debug)]
pub struct ErrorSlot {
    code: AtomicU32,
    message: OnceCell<String>,
}

impl Default for ErrorSlot {
    fn default() -> Self {
        Self {
            code: AtomicU32::new(ErrorCode::Success as u32),
            message: OnceCell::new(),
        }
    }
}

impl ErrorSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn code(&self) -> ErrorCode {
        ErrorCode::from_u32(self.code.load(Ordering::Acquire)).unwrap_or(ErrorCode::OutOfRange)
    }

    pub fn message(&self) -> Option<&str> {
        self.message.get().map(String::as_str)
    }

    /// Records `code`, unless the slot already holds an error of higher
    /// priority.
    pub fn writeback(&self, code: ErrorCode, message: Option<&str>) {
        let mut current = self.code.load(Ordering::Acquire);
        loop {
            let held = ErrorCode::from_u32(current).unwrap_or(ErrorCode::OutOfRange);
            if !held.accepts(code) {
                return;
            }
            match self.code.compare_exchange_weak(
                current,
                code as u32,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => break,
                Err(actual) => current = actual,
            }
        }

        // At most one fatal error is ever accepted.
        if let (true, Some(message)) = (code.is_fatal(), message) {
            let _ = self.message.set(message.to_string());
        }
    }

    pub fn reset(&mut self) {
        *self.code.get_mut() = ErrorCode::Success as u32;
        self.message = OnceCell::new();
    }
}

/// Constant parameters of a join, e.g., literals of the join predicate.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ParamBuf {
    values: Vec<Datum>,
}

impl ParamBuf {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    pub fn get(&self, index: usize) -> Option<&Datum> {
        self.values.get(index)
    }

    pub fn nparams(&self) -> usize {
        self.values.len()
    }

    /// The length of the buffer in bytes.
    pub fn length(&self) -> usize {
        maxalign(KERN_PARAMBUF_HEAD_LENGTH + 4 * self.values.len())
            + maxalign(heap_tuple_size(&self.values))
    }
}

/// The per-lane kernel context.
///
/// Carries the first error that a lane encountered, and gives the supplied
/// join functions access to the parameters and the CRC32 table.
#[derive(Debug)]
pub struct KernContext<'a> {
    errcode: ErrorCode,
    message: Option<String>,
    params: &'a ParamBuf,
    crc32_table: &'a [u32; 256],
}

impl<'a> KernContext<'a> {
    pub fn new(params: &'a ParamBuf, crc32_table: &'a [u32; 256]) -> Self {
        Self {
            errcode: ErrorCode::Success,
            message: None,
            params,
            crc32_table,
        }
    }

    /// Records an error. Keeps the first error, except that a fatal error
    /// replaces a suspend.
    pub fn set_error<S: Into<String>>(&mut self, code: ErrorCode, message: S) {
        if self.errcode.accepts(code) {
            self.errcode = code;
            self.message = Some(message.into());
        }
    }

    pub fn errcode(&self) -> ErrorCode {
        self.errcode
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn is_error(&self) -> bool {
        self.errcode != ErrorCode::Success
    }

    pub fn params(&self) -> &'a ParamBuf {
        self.params
    }

    pub fn crc32_table(&self) -> &'a [u32; 256] {
        self.crc32_table
    }

    /// Hashes join keys with CRC32.
    ///
    /// Returns `None` if any key is `NULL`.
    pub fn hash_keys<'d, I>(&self, keys: I) -> Option<u32>
    where
        I: IntoIterator<Item = &'d Datum>,
    {
        let mut crc = Crc32::new(self.crc32_table);
        for key in keys {
            crc.update(&key.hash_bytes()?);
        }
        Some(crc.finish())
    }
}

/// Offsets of the segments of the control object.
///
/// The control object consists of a fixed head with the statistics counters,
/// the parameter buffer, the pseudo-stacks of all groups, and the suspend
/// blocks of all groups. Every suspend block records the layout it was saved
/// with, because a block can only be resumed with an identical layout.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuJoinLayout {
    pub kparams_offset: u64,
    pub pstack_offset: u64,
    pub pstack_nrooms: u32,
    pub suspend_offset: u64,
    pub total_length: u64,
    pub num_rels: u32,
    pub num_groups: u32,
    pub local_size: u32,
}

impl GpuJoinLayout {
    pub fn new(dims: LaunchDims, num_rels: u32, pstack_nrooms: u32, params: &ParamBuf) -> Result<Self> {
        let overflow = || ErrorKind::IntegerOverflow("Control object length overflows".to_string());

        let num_groups = dims.grid.x as u64;
        let local_size = dims.block.x as u64;
        let depths = num_rels as u64 + 1;

        let kparams_offset = maxalign((KERN_GPUJOIN_HEAD_LENGTH + 4 * GPUJOIN_MAX_DEPTH as u64) as usize) as u64;
        let pstack_offset = maxalign((kparams_offset as usize).checked_add(params.length()).ok_or_else(overflow)?) as u64;

        // Depth d holds records of d + 1 row references.
        let pstack_group_length = (pstack_nrooms as u64)
            .checked_mul(depths * (depths + 1) / 2 * 4)
            .ok_or_else(overflow)?;
        let suspend_offset = pstack_group_length
            .checked_mul(num_groups)
            .and_then(|l| l.checked_add(pstack_offset))
            .ok_or_else(overflow)?;

        let suspend_head_length = 4 * (3 + 4 * depths);
        let suspend_lane_length = depths * (4 + 1);
        let suspend_group_length = maxalign((suspend_head_length + local_size * suspend_lane_length) as usize) as u64;
        let total_length = suspend_group_length
            .checked_mul(num_groups)
            .and_then(|l| l.checked_add(suspend_offset))
            .ok_or_else(overflow)?;

        Ok(Self {
            kparams_offset,
            pstack_offset,
            pstack_nrooms,
            suspend_offset,
            total_length,
            num_rels,
            num_groups: dims.grid.x,
            local_size: dims.block.x,
        })
    }
}

/// Join statistics.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GpuJoinStats {
    /// Rows fetched from the source relation.
    pub source_nitems: u64,
    /// Source rows that passed the scan qualifiers.
    pub outer_nitems: u64,
    /// Combinations produced at depth `i + 1`.
    pub stat_nitems: Vec<u64>,
}

/// The control object shared by all worker groups of a join kernel.
#[derive(Debug)]
pub struct KernGpuJoin {
    kerror: ErrorSlot,
    layout: GpuJoinLayout,
    params: ParamBuf,
    resume_context: bool,
    src_read_pos: WindowCursor,
    source_nitems: AtomicU64,
    outer_nitems: AtomicU64,
    stat_nitems: Vec<AtomicU64>,
}

impl KernGpuJoin {
    pub fn new(dims: LaunchDims, num_rels: u32, pstack_nrooms: u32, params: ParamBuf) -> Result<Self> {
        if num_rels == 0 || num_rels > GPUJOIN_MAX_DEPTH {
            Err(ErrorKind::InvalidArgument(format!(
                "Number of inner relations must be between 1 and {}",
                GPUJOIN_MAX_DEPTH
            )))?;
        }
        if pstack_nrooms < dims.block.x {
            Err(ErrorKind::InvalidArgument(
                "Pseudo-stack must have at least one room per lane".to_string(),
            ))?;
        }

        let layout = GpuJoinLayout::new(dims, num_rels, pstack_nrooms, &params)?;

        Ok(Self {
            kerror: ErrorSlot::new(),
            layout,
            params,
            resume_context: false,
            src_read_pos: WindowCursor::new(0),
            source_nitems: AtomicU64::new(0),
            outer_nitems: AtomicU64::new(0),
            stat_nitems: (0..num_rels).map(|_| AtomicU64::new(0)).collect(),
        })
    }

    pub fn kerror(&self) -> &ErrorSlot {
        &self.kerror
    }

    pub fn layout(&self) -> GpuJoinLayout {
        self.layout
    }

    pub fn params(&self) -> &ParamBuf {
        &self.params
    }

    pub fn num_rels(&self) -> u32 {
        self.layout.num_rels
    }

    pub fn pstack_nrooms(&self) -> u32 {
        self.layout.pstack_nrooms
    }

    pub fn resume_context(&self) -> bool {
        self.resume_context
    }

    pub fn src_read_pos(&self) -> &WindowCursor {
        &self.src_read_pos
    }

    /// Prepares the control object for the next launch.
    ///
    /// A fresh launch rewinds the source cursor. A resumed launch keeps it.
    pub(crate) fn prepare_launch(&mut self, resume: bool) {
        self.kerror.reset();
        self.resume_context = resume;
        if !resume {
            self.src_read_pos.reset(0);
        }
    }

    /// Replaces the query parameters.
    ///
    /// The layout changes if the parameter buffer changes its length. Groups
    /// that were suspended with the old layout cannot be resumed.
    pub(crate) fn set_params(&mut self, dims: LaunchDims, params: ParamBuf) -> Result<()> {
        self.layout = GpuJoinLayout::new(dims, self.layout.num_rels, self.layout.pstack_nrooms, &params)?;
        self.params = params;
        Ok(())
    }

    pub(crate) fn add_source_nitems(&self, n: u32) {
        self.source_nitems.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn add_outer_nitems(&self, n: u32) {
        self.outer_nitems.fetch_add(n as u64, Ordering::Relaxed);
    }

    /// Adds `n` combinations to the statistics of `depth`, counting from 1.
    pub(crate) fn add_stat_nitems(&self, depth: u32, n: u32) {
        if let Some(counter) = depth
            .checked_sub(1)
            .and_then(|i| self.stat_nitems.get(i as usize))
        {
            counter.fetch_add(n as u64, Ordering::Relaxed);
        }
    }

    pub fn stats(&self) -> GpuJoinStats {
        GpuJoinStats {
            source_nitems: self.source_nitems.load(Ordering::Relaxed),
            outer_nitems: self.outer_nitems.load(Ordering::Relaxed),
            stat_nitems: self
                .stat_nitems
                .iter()
                .map(|c| c.load(Ordering::Relaxed))
                .collect(),
        }
    }
}
