//! Runs the full dedup/anonymise/mask pipeline over one capture file.
//!
//! ```text
//! cargo run --example mask_pcap -- input.pcap output.pcap
//! ```

use std::path::PathBuf;

use pktmask_core::config::PipelineConfig;
use pktmask_core::pipeline::Pipeline;

fn main() {
    env_logger::init();

    let mut args = std::env::args().skip(1);
    let input: PathBuf = match args.next() {
        Some(p) => p.into(),
        None => {
            eprintln!("usage: mask_pcap <input.pcap> <output.pcap>");
            std::process::exit(2);
        }
    };
    let output: PathBuf = match args.next() {
        Some(p) => p.into(),
        None => {
            eprintln!("usage: mask_pcap <input.pcap> <output.pcap>");
            std::process::exit(2);
        }
    };

    let (config, progress) = PipelineConfig::builder()
        .on_progress(|event| log::debug!("{event:?}"))
        .build()
        .expect("default configuration is always valid");

    let pipeline = Pipeline::new(&config, &progress);
    match pipeline.run(&input, &output) {
        Ok(stats) => {
            println!("done: {stats:?}");
        }
        Err(e) => {
            eprintln!("pipeline failed: {e}");
            std::process::exit(1);
        }
    }
}
