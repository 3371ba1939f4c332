//! Kernel shell: a line-oriented command loop over the facade.
//!
//! Generic over `BufRead`/`Write` so tests drive it with in-memory buffers
//! instead of a TTY. Commands: `ls`, `touch`, `cat`, `netstat`, `dmesg`,
//! `panic`, `help`, `exit`.

use std::io::{self, BufRead, Write};
use std::sync::Arc;

use crate::fatal::fatal;
use crate::kernel::Kernel;

const PROMPT: &str = "kernel> ";
const HELP: &str = "available: ls [path], touch <path>, cat <path>, netstat, dmesg, panic, help, exit";

pub struct Shell {
    kernel: Arc<Kernel>,
}

impl Shell {
    pub fn new(kernel: Arc<Kernel>) -> Self {
        Self { kernel }
    }

    /// Processes commands until `exit` or EOF. Returns the process exit
    /// code (0 on a clean exit).
    pub fn run<R: BufRead, W: Write>(&self, input: R, out: &mut W) -> io::Result<i32> {
        let mut lines = input.lines();
        loop {
            write!(out, "{PROMPT}")?;
            out.flush()?;
            let Some(line) = lines.next() else {
                writeln!(out)?;
                return Ok(0);
            };
            if !self.dispatch(line?.trim(), out)? {
                return Ok(0);
            }
        }
    }

    /// Runs one command. Returns `false` when the loop should stop.
    fn dispatch<W: Write>(&self, line: &str, out: &mut W) -> io::Result<bool> {
        let mut parts = line.split_whitespace();
        let Some(cmd) = parts.next() else {
            return Ok(true);
        };

        match cmd {
            "ls" => {
                let path = parts.next().unwrap_or("/");
                match self.kernel.vfs().list(path) {
                    Ok(entries) => {
                        for e in entries {
                            let tag = match e.kind {
                                crate::vfs::NodeKind::Directory => "[DIR] ",
                                crate::vfs::NodeKind::File => "[FILE]",
                            };
                            writeln!(out, "{tag} {}\tid:{}\tsize:{}", e.name, e.id, e.size)?;
                        }
                    }
                    Err(err) => writeln!(out, "ls: {err}")?,
                }
            }
            "touch" => match parts.next() {
                Some(path) => {
                    if let Err(err) = self.kernel.vfs().create_file(path, b"") {
                        writeln!(out, "touch: {err}")?;
                    }
                }
                None => writeln!(out, "usage: touch <path>")?,
            },
            "cat" => match parts.next() {
                Some(path) => match self.kernel.vfs().read_file(path) {
                    Ok(bytes) => writeln!(out, "{}", String::from_utf8_lossy(&bytes))?,
                    Err(err) => writeln!(out, "cat: {err}")?,
                },
                None => writeln!(out, "usage: cat <path>")?,
            },
            "netstat" => {
                let stats = self.kernel.net().stats();
                writeln!(
                    out,
                    "rx ring: depth {} / {}  received {}  dropped {}",
                    stats.depth,
                    stats.capacity - 1,
                    stats.received,
                    stats.dropped
                )?;
            }
            "dmesg" => self.kernel.log().dump(out)?,
            "panic" => fatal("user-requested panic from shell"),
            "help" => writeln!(out, "{HELP}")?,
            "exit" => return Ok(false),
            other => writeln!(out, "unknown command '{other}', try 'help'")?,
        }
        Ok(true)
    }
}
