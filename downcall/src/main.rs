use clap::Parser as ClapParser;
use std::process;

use downcall::{
    AddressResolver, Binder, FunctionDescriptor, Library, LogicalType,
    Signature, Value,
};

#[derive(ClapParser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Symbol to call
    #[arg(help = "Name of the native function to bind")]
    symbol: String,

    /// Library to look the symbol up in (default: the running process)
    #[arg(long, short, help = "Shared library to open")]
    library: Option<String>,

    /// Return type of the function
    #[arg(long, short, default_value = "void", help = "Logical return type")]
    returns: String,

    /// Arguments, in order
    #[arg(
        long = "arg",
        short,
        value_name = "TYPE=VALUE",
        help = "Argument as TYPE=VALUE, e.g. i32=42 or f64=1.5"
    )]
    args: Vec<String>,

    /// Number of times to perform the call
    #[arg(long, default_value_t = 1, help = "Repeat the call N times")]
    repeat: usize,

    /// Log binds and descriptor builds
    #[arg(long, short, help = "Enable debug logging")]
    verbose: bool,
}

fn parse_type(name: &str) -> Result<LogicalType, String> {
    LogicalType::from_name(name).ok_or_else(|| format!("unknown type '{name}'"))
}

fn parse_arg(text: &str) -> Result<Value, String> {
    let (ty, value) = text
        .split_once('=')
        .ok_or_else(|| format!("expected TYPE=VALUE, got '{text}'"))?;
    let ty = parse_type(ty)?;
    Value::parse(ty, value)
        .ok_or_else(|| format!("'{value}' is not a valid {ty}"))
}

fn run(cli: &Cli) -> Result<Vec<Value>, String> {
    let return_type = parse_type(&cli.returns)?;
    let args = cli
        .args
        .iter()
        .map(|arg| parse_arg(arg))
        .collect::<Result<Vec<_>, _>>()?;

    let binder = Binder::host();
    let target = *binder.target();
    let layout_of = |ty: LogicalType| {
        ty.default_layout(&target)
            .ok_or_else(|| format!("{ty} cannot be given on the command line"))
    };
    let argument_layouts = args
        .iter()
        .map(|arg| layout_of(arg.logical_type()))
        .collect::<Result<Vec<_>, _>>()?;
    let descriptor = match return_type {
        LogicalType::Void => FunctionDescriptor::of_void(argument_layouts),
        ty => FunctionDescriptor::of(layout_of(ty)?, argument_layouts),
    };
    let signature =
        Signature::new(return_type, args.iter().map(Value::logical_type));

    let library = match &cli.library {
        Some(path) => Library::open(path),
        None => Library::this_process(),
    }
    .map_err(|err| err.to_string())?;
    let address = library
        .resolve(&cli.symbol)
        .map_err(|err| err.to_string())?;
    let adapter = binder
        .bind(address, &descriptor, &signature)
        .map_err(|err| err.to_string())?;

    let mut results = Vec::with_capacity(cli.repeat);
    for _ in 0..cli.repeat {
        // SAFETY: the user vouches that the symbol has the given shape
        let result = unsafe { adapter.call(&args) };
        results.push(result.map_err(|err| err.to_string())?);
    }
    log::debug!("cache: {:?}", binder.cache().stats());
    Ok(results)
}

fn main() {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(
        env_logger::Env::default().default_filter_or(default_filter),
    )
    .init();

    match run(&cli) {
        Ok(results) => {
            for result in results {
                println!("{result}");
            }
        }
        Err(err) => {
            eprintln!("Error calling '{}': {}", cli.symbol, err);
            process::exit(1);
        }
    }
}
