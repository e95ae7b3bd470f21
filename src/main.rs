use std::path::PathBuf;
use std::process;

use clap::Parser;

use jackc::driver::{self, CompileOptions};

#[derive(Parser)]
#[command(
    name = "jackc",
    version,
    about = "Jack compiler: .jack classes to stack-VM assembly"
)]
struct Cli {
    /// A .jack file, or a directory whose .jack files are all compiled
    input: PathBuf,
    /// Dump the class and subroutine symbol tables as JSON next to the output
    #[arg(long)]
    dump_symbols: bool,
}

fn main() {
    let cli = Cli::parse();
    let options = CompileOptions {
        dump_symbols: cli.dump_symbols,
    };

    let sources = match driver::collect_sources(&cli.input) {
        Ok(sources) => sources,
        Err(e) => {
            e.report();
            process::exit(1);
        }
    };

    let mut failed = false;
    for source in &sources {
        match driver::compile_file(source, &options) {
            Ok(vm_path) => {
                eprintln!("Compiled {} -> {}", source.display(), vm_path.display());
            }
            Err(e) => {
                e.report();
                failed = true;
            }
        }
    }

    if failed {
        process::exit(1);
    }
}
