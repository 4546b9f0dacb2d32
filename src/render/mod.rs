mod dockerfile;

pub use dockerfile::{instruction, render, step_for_instruction};
