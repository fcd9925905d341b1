use std::collections::VecDeque;
use std::rc::Rc;

use relq_stats::TableStats;
use relq_storage::{PageNum, Storage};
use relq_types::{Row, Schema, Tuple};
use tracing::debug;

use super::{concat, JoinCore, JoinType, PagedInput};
use crate::scan::decode_page;
use crate::{ExecResult, ExecutorError, Operator, OperatorKind};

/// Nested loop join reading the left input a block of pages at a time.
///
/// For every block of left pages, each right page is read once and every
/// left row of the block is compared with every row on that page. A block
/// of one page is the page nested loop join; the block nested loop join
/// uses `B - 2` pages, leaving one buffer for the right page and one for
/// output.
pub struct BlockJoin {
    core: JoinCore,
    join_type: JoinType,
    block_pages: usize,
    state: Option<BlockState>,
}

struct BlockState {
    left: PagedInput,
    right: PagedInput,
    left_pages: Vec<PageNum>,
    right_pages: Vec<PageNum>,
    /// Index of the first left page of the current block.
    block_start: usize,
    /// Index of the next right page to read against the current block.
    right_cursor: usize,
    block: Vec<Row>,
    output: VecDeque<Row>,
}

impl BlockJoin {
    pub fn page_nested(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        left_column: &str,
        right_column: &str,
        storage: Rc<dyn Storage>,
    ) -> ExecResult<Self> {
        let core = JoinCore::new(left, right, left_column, right_column, storage)?;
        Ok(Self {
            core,
            join_type: JoinType::Pnlj,
            block_pages: 1,
            state: None,
        })
    }

    pub fn block_nested(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        left_column: &str,
        right_column: &str,
        storage: Rc<dyn Storage>,
    ) -> ExecResult<Self> {
        let block_pages = storage.buffer_pages().saturating_sub(2).max(1);
        let core = JoinCore::new(left, right, left_column, right_column, storage)?;
        Ok(Self {
            core,
            join_type: JoinType::Bnlj,
            block_pages,
            state: None,
        })
    }

    pub fn block_pages(&self) -> usize {
        self.block_pages
    }

    fn load_block(&self, state: &mut BlockState) -> ExecResult<()> {
        let end = (state.block_start + self.block_pages).min(state.left_pages.len());
        let storage = &self.core.storage;
        let schema = self.core.left.schema();
        state.block.clear();
        for &page_num in &state.left_pages[state.block_start..end] {
            let page = storage.read_page(state.left.name(), page_num)?;
            state.block.extend(decode_page(schema, &page)?);
        }
        state.right_cursor = 0;
        Ok(())
    }

    /// Refill the output buffer from the next (block, right page) pair.
    /// Returns false once every pair has been visited.
    fn fill(&self, state: &mut BlockState) -> ExecResult<bool> {
        loop {
            if state.block_start >= state.left_pages.len() {
                return Ok(false);
            }
            if state.right_cursor < state.right_pages.len() {
                break;
            }
            state.block_start += self.block_pages;
            if state.block_start >= state.left_pages.len() {
                return Ok(false);
            }
            self.load_block(state)?;
        }

        let page_num = state.right_pages[state.right_cursor];
        state.right_cursor += 1;
        let page = self.core.storage.read_page(state.right.name(), page_num)?;
        let right_rows = decode_page(self.core.right.schema(), &page)?;
        for left in &state.block {
            for right in &right_rows {
                if self.core.matches(left, right)? {
                    state.output.push_back(concat(left, right));
                }
            }
        }
        Ok(true)
    }

    fn release(state: BlockState) -> ExecResult<()> {
        for input in [state.left, state.right] {
            if let PagedInput::Temp(temp) = input {
                temp.release()?;
            }
        }
        Ok(())
    }
}

impl Operator for BlockJoin {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Join(self.join_type)
    }

    fn schema(&self) -> &Schema {
        &self.core.schema
    }

    fn stats(&self) -> &TableStats {
        &self.core.stats
    }

    fn io_cost(&self) -> u64 {
        let left = self.core.left_pages();
        let blocks = left.div_ceil(self.block_pages as u64);
        left + blocks * self.core.right_pages()
    }

    fn sources(&self) -> Vec<&dyn Operator> {
        self.core.sources()
    }

    fn describe(&self) -> String {
        self.core.describe()
    }

    fn boxed_clone(&self) -> Box<dyn Operator> {
        Box::new(Self {
            core: self.core.boxed_clone(),
            join_type: self.join_type,
            block_pages: self.block_pages,
            state: None,
        })
    }

    fn open(&mut self) -> ExecResult<()> {
        if let Some(previous) = self.state.take() {
            Self::release(previous)?;
        }
        let storage = Rc::clone(&self.core.storage);
        let left = PagedInput::materialize(self.core.left.as_mut(), &storage)?;
        let right = PagedInput::materialize(self.core.right.as_mut(), &storage)?;
        let left_pages = storage.page_nums(left.name())?;
        let right_pages = storage.page_nums(right.name())?;
        debug!(
            join = %self.join_type,
            left_pages = left_pages.len(),
            right_pages = right_pages.len(),
            block_pages = self.block_pages,
            "opening block join"
        );
        let mut state = BlockState {
            left,
            right,
            left_pages,
            right_pages,
            block_start: 0,
            right_cursor: 0,
            block: Vec::new(),
            output: VecDeque::new(),
        };
        self.load_block(&mut state)?;
        self.state = Some(state);
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Tuple>> {
        let mut state = self.state.take().ok_or(ExecutorError::NotOpen)?;
        let result = loop {
            if let Some(row) = state.output.pop_front() {
                break Ok(Some(Tuple::Row(row)));
            }
            match self.fill(&mut state) {
                Ok(true) => {}
                Ok(false) => break Ok(None),
                Err(err) => break Err(err),
            }
        };
        self.state = Some(state);
        result
    }

    fn close(&mut self) -> ExecResult<()> {
        match self.state.take() {
            Some(state) => Self::release(state),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::*;
    use crate::{execute, SeqScan};

    fn keys(join: &mut BlockJoin) -> Vec<(i32, i32)> {
        execute(join)
            .unwrap()
            .into_iter()
            .filter_map(Tuple::into_row)
            .map(|r| (r[1].as_int().unwrap(), r[5].as_int().unwrap()))
            .collect()
    }

    #[test]
    fn block_size_follows_the_buffer_budget() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "a", (0..10).map(row));
        table_with(&catalog, "b", (0..10).map(row));
        let scan = |t| Box::new(SeqScan::new(storage(&catalog), t).unwrap()) as Box<dyn Operator>;
        let pnlj = BlockJoin::page_nested(scan("a"), scan("b"), "int", "int", storage(&catalog)).unwrap();
        let bnlj = BlockJoin::block_nested(scan("a"), scan("b"), "int", "int", storage(&catalog)).unwrap();
        assert_eq!(pnlj.block_pages(), 1);
        assert_eq!(bnlj.block_pages(), 3);
        assert_eq!(pnlj.kind(), OperatorKind::Join(JoinType::Pnlj));
        assert_eq!(bnlj.kind(), OperatorKind::Join(JoinType::Bnlj));
    }

    #[test]
    fn right_pages_drive_the_inner_loop() {
        let (_dir, catalog) = catalog();
        // 289 rows fit a page, so each side spans two pages.
        table_with(&catalog, "a", (0..400).map(|i| row(i % 2)));
        table_with(&catalog, "b", (0..400).map(|i| row(i % 2)));
        let scan = |t| Box::new(SeqScan::new(storage(&catalog), t).unwrap()) as Box<dyn Operator>;
        let mut join = BlockJoin::page_nested(scan("a"), scan("b"), "int", "int", storage(&catalog)).unwrap();
        let out = keys(&mut join);
        assert_eq!(out.len(), 2 * 200 * 200);
        assert!(out.iter().all(|(l, r)| l == r));
        // The first left row is matched against the whole first right page
        // before the second left row is considered.
        assert!(out[..145].iter().all(|&k| k == (0, 0)));
        assert_eq!(out[145], (1, 1));
    }

    #[test]
    fn reopening_restarts_the_join() {
        let (_dir, catalog) = catalog();
        table_with(&catalog, "a", (0..20).map(row));
        table_with(&catalog, "b", (0..20).map(row));
        let scan = |t| Box::new(SeqScan::new(storage(&catalog), t).unwrap()) as Box<dyn Operator>;
        let mut join = BlockJoin::block_nested(scan("a"), scan("b"), "int", "int", storage(&catalog)).unwrap();
        assert_eq!(keys(&mut join).len(), 20);
        assert_eq!(keys(&mut join).len(), 20);
    }
}
