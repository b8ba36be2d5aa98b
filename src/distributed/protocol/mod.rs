mod io;
mod types;

pub(in crate::distributed) use io::{read_message, send_message};
pub(in crate::distributed) use types::*;

#[cfg(test)]
mod tests;
