//! Operator-facing output: the startup banner and update alerts.

use std::io::{self, Write};

use crate::engine::UpdateEvent;

const RED: &str = "\x1b[31m";
const YELLOW: &str = "\x1b[33m";
const RESET: &str = "\x1b[0m";
const BELL: &str = "\x07";

pub struct Alerter {
    beep: bool,
}

impl Alerter {
    pub fn new(beep: bool) -> Self {
        Self { beep }
    }

    pub fn alert<W: Write>(&self, event: &UpdateEvent, out: &mut W) -> io::Result<()> {
        writeln!(
            out,
            "{RED}!!!{RESET} - {YELLOW}UPDATE DETECTED IN {}{RESET} - {RED}!!!{RESET}",
            event.name.to_uppercase()
        )?;
        if self.beep {
            write!(out, "{BELL}")?;
        }
        out.flush()
    }
}

pub fn print_banner<W: Write>(out: &mut W) -> io::Result<()> {
    writeln!(out, "{RED}┌┬┐┬─┐┬┌─┐┌─┐┌─┐┬─┐  ┬ ┬┌─┐┌┬┐┌─┐┬ ┬{RESET}")?;
    writeln!(out, "{RED} │ ├┬┘││ ┬│ ┬├┤ ├┬┘  │││├─┤ │ │  ├─┤{RESET}")?;
    writeln!(out, "{RED} ┴ ┴└─┴└─┘└─┘└─┘┴└─  └┴┘┴ ┴ ┴ └─┘┴ ┴{RESET}")?;
    writeln!(out, "trigger-watch version {}.", env!("CARGO_PKG_VERSION"))?;
    writeln!(out, "This software is provided as-is, without warranty of any kind.")
}
