use std::env::args;
use std::process::exit;

use chainfs::ChainFs;

fn main() {
    env_logger::init();

    let args = args().collect::<Vec<String>>();
    if args.len() != 3 {
        eprintln!("Usage: mkfs <image> <blocks>");
        exit(1);
    }

    let blocks = match args[2].parse::<u32>() {
        Ok(blocks) if blocks > 0 => blocks,
        _ => {
            eprintln!("blocks must be a positive integer");
            exit(1);
        }
    };

    match ChainFs::format(&args[1], blocks) {
        Ok(fs) => {
            println!("formatted {}: {blocks} blocks, {} free", args[1], fs.free_blocks());
            if let Err(err) = fs.close() {
                eprintln!("close failed: {err}");
                exit(1);
            }
        }
        Err(err) => {
            eprintln!("format failed: {err}");
            exit(1);
        }
    }
}
