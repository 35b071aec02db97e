pub mod dispatch;
mod run;
