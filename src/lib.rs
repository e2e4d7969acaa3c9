//! G-code interpreter and canned-cycle engine for CNC lathes and mills
//!
//! Lines come in on channels, are parsed into `params::CodeLine`, routed by `dispatch`
//! and expanded by `cycles` into primitive moves that `gcodes` hands to an
//! `sink::EmissionSink` under the locks of `resource`.

pub mod channel;
pub mod cycles;
pub mod dispatch;
pub mod gcodes;
pub mod interlock;
pub mod lexer;
pub mod machine;
pub mod params;
pub mod reply;
pub mod resource;
pub mod sink;
