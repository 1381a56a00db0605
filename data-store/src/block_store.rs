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


use crate::data_store::{ItemPointer, TupleAccess};
use crate::datum::{Datum, RowRef, Tuple};
use crate::error::{ErrorKind, Result};

/// A line pointer of a page.
#[derive(Clone, Debug, PartialEq)]
pub enum ItemId {
    /// Never used, or reclaimed.
    Unused,
    /// Points to a tuple.
    Normal(Tuple),
    /// Points to a tuple that is no longer visible to anyone.
    Dead,
}

impl ItemId {
    pub fn is_normal(&self) -> bool {
        matches!(self, ItemId::Normal(_))
    }
}

/// A page of a block store.
#[derive(Clone, Debug)]
pub struct Page {
    block_nr: u32,
    items: Vec<ItemId>,
}

impl Page {
    pub fn new(block_nr: u32, items: Vec<ItemId>) -> Self {
        Self { block_nr, items }
    }

    pub fn block_nr(&self) -> u32 {
        self.block_nr
    }

    /// The number of line pointers, i.e., the highest line number.
    pub fn max_offset_number(&self) -> u32 {
        self.items.len() as u32
    }

    /// Returns the line pointer with the 1-based `line_no`.
    pub fn item(&self, line_no: u32) -> Option<&ItemId> {
        line_no
            .checked_sub(1)
            .and_then(|i| self.items.get(i as usize))
    }
}

/// A relation stored in fixed-capacity pages.
///
/// Pages are scanned by several lanes cooperatively. `part_width` is the
/// number of lanes that share a page in one pass; a worker group of `n` lanes
/// thus scans `n / part_width` pages at a time.
#[derive(Clone, Debug)]
pub struct BlockStore {
    ncols: usize,
    lines_per_page: u32,
    part_width: u32,
    pages: Vec<Page>,
}

impl BlockStore {
    pub fn new(ncols: usize, lines_per_page: u32, part_width: u32) -> Result<Self> {
        if lines_per_page == 0 || part_width == 0 {
            Err(ErrorKind::InvalidArgument(
                "Page capacity and partition width must be non-zero".to_string(),
            ))?;
        }

        Ok(Self {
            ncols,
            lines_per_page,
            part_width,
            pages: Vec::new(),
        })
    }

    /// Packs `tuples` densely into pages of `lines_per_page` tuples.
    pub fn from_tuples(
        ncols: usize,
        lines_per_page: u32,
        part_width: u32,
        tuples: Vec<Tuple>,
    ) -> Result<Self> {
        let mut store = Self::new(ncols, lines_per_page, part_width)?;
        let mut items = Vec::with_capacity(lines_per_page as usize);

        for tuple in tuples {
            items.push(ItemId::Normal(tuple));
            if items.len() == lines_per_page as usize {
                store.push_page(std::mem::take(&mut items))?;
            }
        }
        if !items.is_empty() {
            store.push_page(items)?;
        }

        Ok(store)
    }

    /// Appends a page. The block number is the page's position.
    pub fn push_page(&mut self, items: Vec<ItemId>) -> Result<()> {
        if items.len() > self.lines_per_page as usize {
            Err(ErrorKind::InvalidArgument(format!(
                "Page has {} line pointers, but capacity is {}",
                items.len(),
                self.lines_per_page
            )))?;
        }
        if let Some(bad) = items.iter().find_map(|item| match item {
            ItemId::Normal(t) if t.natts() != self.ncols => Some(t.natts()),
            _ => None,
        }) {
            Err(ErrorKind::InvalidArgument(format!(
                "Tuple has {} attributes, but the store expects {}",
                bad, self.ncols
            )))?;
        }

        let block_nr = self.pages.len() as u32;
        self.pages.push(Page::new(block_nr, items));
        Ok(())
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    /// Number of pages.
    pub fn nitems(&self) -> u32 {
        self.pages.len() as u32
    }

    pub fn part_width(&self) -> u32 {
        self.part_width
    }

    pub fn lines_per_page(&self) -> u32 {
        self.lines_per_page
    }

    pub fn page(&self, part_id: u32) -> Option<&Page> {
        self.pages.get(part_id as usize)
    }

    /// Number of normal line pointers over all pages.
    pub fn count_tuples(&self) -> usize {
        self.pages
            .iter()
            .flat_map(|p| p.items.iter())
            .filter(|i| i.is_normal())
            .count()
    }

    /// Encodes the line `line_no` of page `part_id` as a `RowRef`.
    pub fn item_ref(&self, part_id: u32, line_no: u32) -> RowRef {
        debug_assert!(line_no >= 1 && line_no <= self.lines_per_page);
        RowRef::from_index(part_id * self.lines_per_page + (line_no - 1))
    }

    /// Returns the item pointer of a `RowRef`.
    pub fn item_pointer(&self, row: RowRef) -> Option<ItemPointer> {
        let index = row.index()?;
        let page = self.page(index / self.lines_per_page)?;
        Some(ItemPointer {
            block_nr: page.block_nr(),
            line_no: (index % self.lines_per_page + 1) as u16,
        })
    }

    pub fn tuple(&self, row: RowRef) -> Option<&Tuple> {
        let index = row.index()?;
        let page = self.page(index / self.lines_per_page)?;
        match page.item(index % self.lines_per_page + 1)? {
            ItemId::Normal(t) => Some(t),
            _ => None,
        }
    }
}

impl TupleAccess for BlockStore {
    fn attr(&self, row: RowRef, col: usize) -> Option<&Datum> {
        self.tuple(row).and_then(|t| t.attr(col))
    }
}
