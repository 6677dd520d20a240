use std::fs::File;
use std::io::{BufWriter, Read};
use std::process::ExitCode;

use clap::Parser;
use log::{debug, info};

use hartsim_core::core::{Config, Hart, HostSignals, StopReason};
use hartsim_core::loader;
use hartsim_core::selftest;
use hartsim_core::trace::{TextTracer, TraceSink};
use hartsim_core::xlen::Xlen;

/// Flags polled by the run loop at instruction boundaries. The signal
/// handlers do nothing beyond setting them.
static SIGNALS: HostSignals = HostSignals::new();

extern "C" fn handle_sigterm(_: libc::c_int) {
    SIGNALS.request_terminate();
}

extern "C" fn handle_sigusr2(_: libc::c_int) {
    SIGNALS.request_external_interrupt();
}

fn install_signal_handlers() {
    unsafe {
        libc::signal(libc::SIGTERM, handle_sigterm as libc::sighandler_t);
        libc::signal(libc::SIGUSR2, handle_sigusr2 as libc::sighandler_t);
    }
}

#[derive(Parser, Debug)]
#[command(version, about = "Single-hart RV32/RV64 IMC instruction-set simulator", long_about = None)]
struct Args {
    /// Guest image to execute (ELF unless --hex is given).
    binary: Option<String>,
    /// Treat the input as a line-oriented hex dump instead of an ELF.
    #[arg(long)]
    hex: bool,
    /// Register width of the simulated hart (32 or 64).
    #[arg(long, default_value_t = 32)]
    xlen: u32,
    /// Guest memory size in bytes.
    #[arg(long, default_value_t = 1 << 24)]
    memory_size: usize,
    /// Hart id reported by the mhartid CSR.
    #[arg(long, default_value_t = 0)]
    hart_id: u32,
    /// Override the start pc (defaults to the ELF entry point, or 0 for
    /// hex input).
    #[arg(long, value_parser = parse_address)]
    start_address: Option<u64>,
    /// Stop when the pc reaches this address.
    #[arg(long, value_parser = parse_address)]
    stop_address: Option<u64>,
    /// Stop when a store writes this address. For ELF input the `tohost`
    /// symbol is picked up automatically when present.
    #[arg(long, value_parser = parse_address)]
    tohost: Option<u64>,
    /// Write a per-retirement trace to this file.
    #[arg(long)]
    trace: Option<String>,
    /// Run the built-in self-test and exit.
    #[arg(long)]
    self_test: bool,
}

fn parse_address(text: &str) -> Result<u64, String> {
    let parsed = match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex_digits) => u64::from_str_radix(hex_digits, 16),
        None => text.parse(),
    };
    parsed.map_err(|_| format!("invalid address `{text}`"))
}

fn main() -> ExitCode {
    env_logger::init();
    let args = Args::parse();
    install_signal_handlers();

    let outcome = match args.xlen {
        32 => simulate::<u32>(&args),
        64 => simulate::<u64>(&args),
        other => Err(format!("unsupported --xlen {other}: must be 32 or 64")),
    };
    match outcome {
        Ok(code) => code,
        Err(message) => {
            eprintln!("hartsim: {message}");
            ExitCode::FAILURE
        }
    }
}

fn simulate<X: Xlen>(args: &Args) -> Result<ExitCode, String> {
    if args.self_test {
        selftest::self_test::<X>().map_err(|error| error.to_string())?;
        println!("self-test passed (RV{}IMC)", X::BITS);
        return Ok(ExitCode::SUCCESS);
    }

    let Some(binary) = args.binary.as_deref() else {
        return Err("no guest image given (expected a binary path)".to_string());
    };
    let mut image = Vec::new();
    File::open(binary)
        .and_then(|mut file| file.read_to_end(&mut image))
        .map_err(|error| format!("cannot read `{binary}`: {error}"))?;

    let mut hart: Hart<X> = Hart::new(Config {
        hart_id: args.hart_id,
        memory_size: args.memory_size,
        reset_vector: 0,
    });

    let mut start_address = 0;
    let mut to_host = args.tohost;
    if args.hex {
        let text = String::from_utf8(image)
            .map_err(|_| format!("`{binary}` is not valid UTF-8 hex input"))?;
        loader::load_hex(hart.memory_mut(), &text).map_err(|error| error.to_string())?;
    } else {
        let loaded =
            loader::load_elf(hart.memory_mut(), &image).map_err(|error| error.to_string())?;
        debug!(
            "loaded ELF: entry {:#x}, exit {:#x}, tohost {:x?}",
            loaded.entry_point, loaded.exit_point, loaded.to_host
        );
        start_address = loaded.entry_point;
        to_host = to_host.or(loaded.to_host);
    }
    if let Some(address) = args.start_address {
        start_address = address;
    }

    hart.poke_pc(X::from_u64(start_address));
    if let Some(address) = args.stop_address {
        hart.set_stop_address(X::from_u64(address));
    }
    if let Some(address) = to_host {
        hart.set_to_host_address(X::from_u64(address));
    }

    let mut tracer = match args.trace.as_deref() {
        Some(path) => {
            let file = File::create(path)
                .map_err(|error| format!("cannot create trace file `{path}`: {error}"))?;
            Some(TextTracer::new(BufWriter::new(file)))
        }
        None => None,
    };
    let tracer_ref = tracer.as_mut().map(|sink| sink as &mut dyn TraceSink<X>);

    let reason = hart.run(&SIGNALS, tracer_ref);
    info!(
        "retired {} instructions in {} cycles",
        hart.retired_instructions(),
        hart.cycle_count()
    );

    Ok(match reason {
        StopReason::StopAddress => {
            println!("stopped: pc reached {:#x}", hart.peek_pc().to_u64());
            ExitCode::SUCCESS
        }
        StopReason::HostSignal => {
            println!("stopped: termination signal");
            ExitCode::SUCCESS
        }
        StopReason::ToHostWrite => {
            // By convention the stored word's low bit means "done" and the
            // upper bits carry an exit code.
            let word = to_host
                .and_then(|address| hart.peek_memory_u32(address))
                .unwrap_or(0);
            let guest_code = word >> 1;
            println!("stopped: tohost write ({word:#x})");
            if guest_code == 0 {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(guest_code.min(255) as u8)
            }
        }
    })
}
