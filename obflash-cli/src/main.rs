use clap::Parser;
use obflash_lib::definitions::{SessionConfig, DEFAULT_BAUD};
use obflash_lib::image::Image;
use obflash_lib::session::LogSink;
use obflash_lib::ObFlash;

/// OB38S003 serial bridge flash tool
#[derive(Parser, Debug)]
#[clap(version = "0.1.0")]
#[clap(
    about,
    long_about = "ObFlash flashes Intel HEX firmware onto OB38S003 microcontrollers through a serial bridge bootloader"
)]
struct Args {
    /// Serial port name to use
    #[clap(short, long, value_parser)]
    port: String,

    /// Firmware file to be flashed
    #[clap(short, long, value_parser)]
    file: String,

    /// Serial baud rate
    #[clap(short, long, value_parser, default_value_t = DEFAULT_BAUD)]
    baud: usize,

    /// Give up after this many rewinds to the recovery stage
    #[clap(short, long, value_parser, default_value_t = SessionConfig::DEFAULT_MAX_REWINDS)]
    max_rewinds: u32,

    /// Keep rewinding until the target cooperates, overrides --max-rewinds
    #[clap(long, action)]
    retry_forever: bool,

    /// Log every protocol step
    #[clap(short, long, action)]
    verbose: bool,
}

fn main() {
    let args = Args::parse();

    // Initialize logger
    let default_filter = if args.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let image = match Image::from_file(&args.file) {
        Ok(image) => image,
        Err(err) => {
            log::error!("Cannot load firmware: {}", err);
            std::process::exit(1);
        }
    };

    let config = SessionConfig {
        max_rewinds: (!args.retry_forever).then_some(args.max_rewinds),
        ..SessionConfig::default()
    };

    // Try to open serial port
    let obflash = match ObFlash::new(&args.port, args.baud) {
        Ok(obflash) => obflash,
        Err(err) => {
            log::error!("Cannot open port {}: {}", args.port, err);
            std::process::exit(1);
        }
    };

    match obflash.flash(&image, &config, &mut LogSink) {
        Ok(result) if result.success => {
            println!("Write OK");
        }
        Ok(result) => {
            println!(
                "ERROR: Write failed at stage {} after {} rewinds",
                result.final_stage, result.rewinds
            );
            std::process::exit(1);
        }
        Err(err) => {
            println!("ERROR: Serial connection lost: {}", err);
            std::process::exit(1);
        }
    }
}
