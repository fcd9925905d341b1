use std::rc::Rc;

use relq_stats::TableStats;
use relq_storage::Storage;
use relq_types::{Row, Schema, Tuple};

use super::{concat, JoinCore, JoinType};
use crate::{ExecResult, ExecutorError, Operator, OperatorKind};

/// Simple nested loop join: the right input is rescanned once per left row.
pub struct NestedLoopJoin {
    core: JoinCore,
    state: Option<LoopState>,
}

#[derive(Default)]
struct LoopState {
    current: Option<Row>,
    left_done: bool,
}

impl NestedLoopJoin {
    pub fn new(
        left: Box<dyn Operator>,
        right: Box<dyn Operator>,
        left_column: &str,
        right_column: &str,
        storage: Rc<dyn Storage>,
    ) -> ExecResult<Self> {
        Ok(Self {
            core: JoinCore::new(left, right, left_column, right_column, storage)?,
            state: None,
        })
    }

    /// Advance to the next left row and restart the right input for it.
    fn next_left(&mut self, state: &mut LoopState) -> ExecResult<bool> {
        if state.current.take().is_some() {
            self.core.right.close()?;
        }
        while let Some(tuple) = self.core.left.next()? {
            if let Tuple::Row(row) = tuple {
                self.core.right.open()?;
                state.current = Some(row);
                return Ok(true);
            }
        }
        state.left_done = true;
        Ok(false)
    }

    fn advance(&mut self, state: &mut LoopState) -> ExecResult<Option<Tuple>> {
        while !state.left_done {
            let Some(left) = state.current.as_ref() else {
                self.next_left(state)?;
                continue;
            };
            match self.core.right.next()? {
                Some(Tuple::Row(right)) => {
                    if self.core.matches(left, &right)? {
                        return Ok(Some(Tuple::Row(concat(left, &right))));
                    }
                }
                Some(Tuple::Marker) => {}
                None => {
                    self.next_left(state)?;
                }
            }
        }
        Ok(None)
    }
}

impl Operator for NestedLoopJoin {
    fn kind(&self) -> OperatorKind {
        OperatorKind::Join(JoinType::Snlj)
    }

    fn schema(&self) -> &Schema {
        &self.core.schema
    }

    fn stats(&self) -> &TableStats {
        &self.core.stats
    }

    fn io_cost(&self) -> u64 {
        self.core.left_pages() + self.core.left_records() * self.core.right_pages()
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
            state: None,
        })
    }

    fn open(&mut self) -> ExecResult<()> {
        self.core.left.open()?;
        self.state = Some(LoopState::default());
        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<Tuple>> {
        let mut state = self.state.take().ok_or(ExecutorError::NotOpen)?;
        let result = self.advance(&mut state);
        self.state = Some(state);
        result
    }

    fn close(&mut self) -> ExecResult<()> {
        if let Some(state) = self.state.take() {
            if state.current.is_some() {
                self.core.right.close()?;
            }
            self.core.left.close()?;
        }
        Ok(())
    }
}
