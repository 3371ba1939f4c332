use std::io;
use std::process::ExitCode;
use std::sync::Arc;

use kernel_sim::demo;
use kernel_sim::{Kernel, KernelConfig, Shell};

fn main() -> ExitCode {
    let kernel = Arc::new(Kernel::boot(KernelConfig::default()));
    demo::run_simulation(&kernel);

    let shell = Shell::new(Arc::clone(&kernel));
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let code = match shell.run(stdin.lock(), &mut stdout) {
        Ok(code) => code,
        Err(err) => {
            eprintln!("shell error: {err}");
            1
        }
    };

    kernel.shutdown();
    ExitCode::from(code as u8)
}
