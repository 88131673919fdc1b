use core::error::Error;

use clap::Parser;
use hload::{cfg::Config, cmd::Cmd, runtime::Runtime};
use tokio::runtime::Builder;

pub fn main() {
    let cmd = Cmd::parse();
    let guard = match hload::logging::init(cmd.verbose as usize, cmd.log_file.as_deref()) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("ERROR: failed to initialize logging: {err}");
            None
        }
    };

    let rc = run(cmd);
    // Flush the log file, the exit below skips destructors.
    drop(guard);

    if let Err(err) = rc {
        eprintln!("ERROR: {err}");
        std::process::exit(1);
    }
}

fn run(cmd: Cmd) -> Result<(), Box<dyn Error>> {
    let cfg: Config = cmd.try_into()?;

    // Init I/O runtime.
    Builder::new_multi_thread()
        .worker_threads(cfg.threads.get())
        .enable_io()
        .enable_time()
        .thread_name("hload:w")
        .build()?
        .block_on(async {
            let runtime = Runtime::new(cfg);

            runtime.run().await
        })
}
