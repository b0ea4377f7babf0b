mod queue;
mod state_machine;
