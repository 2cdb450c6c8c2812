pub mod rule;
pub mod run;
