pub mod completion;
pub mod launch;
pub mod quit;
