//! Command line interface

mod args;

pub use args::{Args, SubCommand, TorAction, VpnAction};
