use clap::Parser;
use std::path::PathBuf;

use bankpatch_core::{ImageLayout, PatchPlan, PatchSession};

#[derive(Debug, Parser)]
#[command(name = "bankpatch", version, about = "Insert 65816 routines into a cartridge image")]
struct Args {
    /// Cartridge image to patch.
    #[arg(long)]
    input: PathBuf,

    /// Where to write the patched image.
    #[arg(long, required_unless_present = "report_free")]
    output: Option<PathBuf>,

    /// JSON memory map and free-space description.
    #[arg(long)]
    layout: PathBuf,

    /// JSON patch plan, applied in order.
    #[arg(long, required_unless_present = "report_free")]
    plan: Option<PathBuf>,

    /// Print the free regions (after patching, if a plan is given).
    #[arg(long, default_value_t = false)]
    report_free: bool,

    /// Print every symbol defined by the plan.
    #[arg(long, default_value_t = false)]
    symbols: bool,
}

fn run(args: Args) -> bankpatch_core::Result<()> {
    let layout = ImageLayout::load(&args.layout)?;
    let data = std::fs::read(&args.input)?;
    let image = layout.build(data)?;
    log::info!("loaded {:?} ({:#X} bytes)", args.input, image.len());

    let mut session = PatchSession::new(image);
    if let Some(plan_path) = args.plan.as_ref() {
        let plan = PatchPlan::load(plan_path)?;
        plan.into_pipeline().run(&mut session)?;
    }

    if args.symbols {
        let mut symbols: Vec<_> = session.symbols().iter().collect();
        symbols.sort();
        for (name, addr) in symbols {
            println!("{:06X}  {}", addr, name);
        }
    }

    if args.report_free {
        for region in session.image.space().free_regions() {
            println!("{:06X}-{:06X}  {:#X} bytes", region.start, region.end(), region.len);
        }
        println!("total free: {:#X} bytes", session.image.space().total_free());
    }

    if let Some(output) = args.output.as_ref() {
        std::fs::write(output, session.into_image().as_bytes())?;
        log::info!("wrote {:?}", output);
    }

    Ok(())
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let args = Args::parse();
    if let Err(err) = run(args) {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
