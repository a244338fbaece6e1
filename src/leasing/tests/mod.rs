mod common;
mod schedule;
mod state_machine;
