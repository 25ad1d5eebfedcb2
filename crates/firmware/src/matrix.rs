//! Drives the key matrix: one row at a time is pulled low and the sixteen columns are read back.

use embassy_stm32::gpio::{Input, Output};
use organum_lib::configuration::MATRIX_COLUMNS;

/// Row outputs wired on this board.
pub const ROWS: usize = 8;

/// Core clock cycles to wait after selecting a row before the columns are stable (about 1 µs at 216 MHz).
const SETTLE_CYCLES: u32 = 216;

/// The row outputs and column inputs wired to the key matrix.
pub struct Matrix {
    rows: [Output<'static>; ROWS],
    columns: [Input<'static>; MATRIX_COLUMNS],
}

impl Matrix {
    /// Row outputs must idle high, and columns must be pulled up, so that a closed contact reads low.
    pub fn new(rows: [Output<'static>; ROWS], columns: [Input<'static>; MATRIX_COLUMNS]) -> Self {
        Self { rows, columns }
    }

    /// Raw column levels of `row`, bit `n` being column `n` (high = 1).
    pub fn read_row(&mut self, row: usize) -> u16 {
        let Some(output) = self.rows.get_mut(row) else {
            return u16::MAX;
        };

        output.set_low();
        cortex_m::asm::delay(SETTLE_CYCLES);
        let levels = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, column)| column.is_high())
            .fold(0, |levels, (n, _)| levels | 1 << n);
        output.set_high();

        levels
    }
}
