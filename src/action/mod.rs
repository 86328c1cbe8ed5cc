pub mod dispatcher;
pub mod interpreter;
