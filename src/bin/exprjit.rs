//! Demo driver: builds a call to a native `add`, compiles it and runs it.
//!
//! ```text
//! exprjit --left 5 --right 7           # add(5, 7)
//! exprjit --left 5 --right 7 --shared  # add(s, s) with s = add(5, 7) generated once
//! exprjit --left 5 --right 7 --dump    # also print every node and the statistics
//! ```
//!
//! Pool sizes come from `EXPRJIT_GP_REGISTERS`, `EXPRJIT_XMM_REGISTERS` and
//! `EXPRJIT_TEMP_SLOTS`; set `RUST_LOG=debug` to follow the passes.

use bumpalo::Bump;
use clap::Parser;
use exprjit::{CompileOptions, DiagnosticSink, ExpressionTree, NodeDescription};

#[derive(Parser, Debug)]
#[command(version, about = "Compile and run a call expression tree", long_about = None)]
struct Args {
    /// First argument of the call.
    #[arg(long, default_value_t = 5, allow_negative_numbers = true)]
    left: i64,

    /// Second argument of the call.
    #[arg(long, default_value_t = 7, allow_negative_numbers = true)]
    right: i64,

    /// Feed the call's result to a second call twice, as a shared node.
    #[arg(long)]
    shared: bool,

    /// Print every node and the compilation statistics.
    #[arg(long)]
    dump: bool,
}

extern "C" fn add(a: i64, b: i64) -> i64 {
    a.wrapping_add(b)
}

type AddFn = extern "C" fn(i64, i64) -> i64;

/// Prints node descriptions to stdout.
struct StdoutSink;

impl DiagnosticSink for StdoutSink {
    fn describe(&mut self, description: &NodeDescription) {
        println!("  {description}");
    }
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();
    let args = Args::parse();

    let arena = Bump::new();
    let mut tree = ExpressionTree::with_options(&arena, CompileOptions::from_env());

    let function = tree.immediate(add as AddFn);
    let left = tree.immediate(args.left);
    let right = tree.immediate(args.right);
    let mut root = tree.call(function, &[left.into(), right.into()])?;
    if args.shared {
        root = tree.call(function, &[root.into(), root.into()])?;
    }

    let compiled = tree.compile::<extern "C" fn() -> i64>(root)?;
    let result = (compiled.entry())();
    println!("{result}");

    if args.dump {
        println!("nodes:");
        tree.print(&mut StdoutSink);
        println!("{}", compiled.stats());
        println!("code: {} bytes", compiled.code().len());
    }
    Ok(())
}
