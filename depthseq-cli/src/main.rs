use std::collections::VecDeque;
use std::error::Error;
use std::time::Instant;

use depthseq::{Config, DataLoader, Intrinsics};
use rten_tensor::prelude::*;
use rten_tensor::NdTensorView;

struct Args {
    /// Config file to load.
    config: String,

    /// Load evaluation batches instead of training batches.
    eval: bool,

    /// Number of batches to load.
    batches: usize,

    /// Override the seed from the config.
    seed: Option<u64>,

    /// Override the split from the config.
    split: Option<String>,

    /// Enable verbose logging.
    verbose: bool,
}

fn parse_args() -> Result<Args, lexopt::Error> {
    use lexopt::prelude::*;

    let mut values = VecDeque::new();
    let mut eval = false;
    let mut batches = 1;
    let mut seed = None;
    let mut split = None;
    let mut verbose = false;

    let mut parser = lexopt::Parser::from_env();
    while let Some(arg) = parser.next()? {
        match arg {
            Value(val) => values.push_back(val.string()?),
            Short('e') | Long("eval") => eval = true,
            Short('n') | Long("batches") => batches = parser.value()?.parse()?,
            Short('s') | Long("seed") => seed = Some(parser.value()?.parse()?),
            Long("split") => split = Some(parser.value()?.string()?),
            Short('v') | Long("verbose") => verbose = true,
            Short('h') | Long("help") => {
                println!(
                    "Load batches from a depth and ego-motion dataset.

Usage: {bin_name} [OPTIONS] <config>

  -e, --eval         Load evaluation batches in manifest order
  -n, --batches <N>  Number of batches to load [default: 1]
  -s, --seed <SEED>  Seed for shuffling and augmentation
      --split <NAME> Manifest to load, e.g. `train` or `val`
  -v, --verbose      Enable verbose logging
  -h, --help         Print help
",
                    bin_name = parser.bin_name().unwrap_or("depthseq")
                );
                std::process::exit(0);
            }
            _ => return Err(arg.unexpected()),
        }
    }

    let config = values.pop_front().ok_or("missing `<config>` arg")?;

    Ok(Args {
        config,
        eval,
        batches,
        seed,
        split,
        verbose,
    })
}

/// Format a shape as `[d0, d1, ...]`.
fn format_shape(shape: &[usize]) -> String {
    let dims: Vec<String> = shape.iter().map(|d| d.to_string()).collect();
    format!("[{}]", dims.join(", "))
}

fn mean(tensor: NdTensorView<u8, 4>) -> f32 {
    if tensor.is_empty() {
        return 0.;
    }
    let sum: u64 = tensor.iter().map(|&x| x as u64).sum();
    sum as f32 / tensor.len() as f32
}

fn print_tensor(name: &str, tensor: NdTensorView<u8, 4>) {
    println!(
        "  {:<16} {:<20} mean {:.2}",
        name,
        format_shape(&tensor.shape()),
        mean(tensor)
    );
}

fn print_intrinsics(matrix: NdTensorView<f32, 2>) {
    match Intrinsics::from_matrix(matrix) {
        Ok(k) => println!(
            "  intrinsics[0]    fx {:.2} fy {:.2} cx {:.2} cy {:.2}",
            k.fx, k.fy, k.cx, k.cy
        ),
        Err(err) => println!("  intrinsics[0]    invalid: {}", err),
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args()?;

    let default_level = if args.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level)),
        )
        .init();

    let mut config = Config::from_json_file(&args.config)?;
    if args.seed.is_some() {
        config.seed = args.seed;
    }
    if let Some(split) = args.split {
        config.split = split;
    }
    tracing::info!(path = %args.config, seed = ?config.seed, "loaded config");

    let loader = DataLoader::new(config)?;
    println!(
        "Dataset: {} samples, {} batches per epoch",
        loader.len(),
        loader.batches_per_epoch()
    );

    let start = Instant::now();
    let mut loaded = 0;
    if args.eval {
        for (i, batch) in loader.eval_batches().take(args.batches).enumerate() {
            let batch = batch?;
            loaded += 1;
            println!("Batch {}", i);
            print_tensor("tgt_image", batch.tgt_image.view());
            print_tensor("src_image_stack", batch.src_image_stack.view());
            if batch.intrinsics.size(0) > 0 {
                print_intrinsics(batch.intrinsics.slice(0usize));
            }
        }
    } else {
        for (i, batch) in loader.train_batches().take(args.batches).enumerate() {
            let batch = batch?;
            loaded += 1;
            println!("Batch {}", i);
            print_tensor("tgt_image", batch.tgt_image.view());
            print_tensor("src_image_stack", batch.src_image_stack.view());
            print_tensor("tgt_sem", batch.tgt_sem.view());
            print_tensor("src_sem_stack", batch.src_sem_stack.view());
            if batch.intrinsics.size(0) > 0 && batch.intrinsics.size(1) > 0 {
                print_intrinsics(batch.intrinsics.slice((0usize, 0usize)));
            }
        }
    }
    println!(
        "Loaded {} batches in {:.2}ms",
        loaded,
        start.elapsed().as_secs_f64() * 1000.
    );

    Ok(())
}
