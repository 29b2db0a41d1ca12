use anyhow::{Context, Result};
use clap::Parser;
use std::fs::File;
use std::io::{self, BufWriter, Read, Write};
use std::path::Path;
use tracebuf::cli::{Cli, OutputFormat, TraceCommand};
use tracebuf::device::{DeviceSlot, TraceDevice};
use tracebuf::endpoints::EndpointTable;
use tracebuf::json_output::{JsonOutput, JsonRegion};
use tracebuf::record::RECORD_SIZE;
use tracing_subscriber::EnvFilter;

/// Initialize tracing subscriber for debug output
fn init_tracing(debug: bool) {
    if debug {
        tracing_subscriber::fmt()
            .with_env_filter(
                EnvFilter::from_default_env().add_directive(tracing::Level::TRACE.into()),
            )
            .with_writer(std::io::stderr)
            .init();
    }
}

fn open_output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    Ok(match path {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create {}", path.display()))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    })
}

/// Send `command` through the trace_on endpoint
fn switch(device: &TraceDevice, command: &str) -> Result<()> {
    let mut control = device.open_control()?;
    control
        .write_all(command.as_bytes())
        .with_context(|| format!("trace_on rejected {command:?}"))?;
    Ok(())
}

fn dump(device: &TraceDevice, format: OutputFormat, out: &mut dyn Write) -> Result<()> {
    switch(device, "stop")?;

    match format {
        OutputFormat::Text => {
            io::copy(&mut device.open_trace()?, out)?;
        }
        OutputFormat::Raw => {
            io::copy(&mut device.open_tracedata()?, out)?;
        }
        OutputFormat::Hex => {
            let mut session = device.open_tracedata()?;
            let mut raw = [0u8; RECORD_SIZE];
            loop {
                match session.read_exact(&mut raw) {
                    Ok(()) => writeln!(out, "{}", hex::encode(raw))?,
                    Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => break,
                    Err(e) => return Err(e.into()),
                }
            }
        }
        OutputFormat::Json => {
            let region = device.buffer().region();
            let range = region.range();
            let mut output = JsonOutput::new(JsonRegion {
                start: format!("{:#x}", range.start),
                size: range.size,
                capacity: region.capacity(),
                strategy: region.strategy(),
            });
            let mut session = device.open_trace()?;
            while let Some((index, entry)) = session.next_record() {
                output.add_entry(index, &entry);
            }
            writeln!(out, "{}", output.to_json()?)?;
        }
    }
    Ok(())
}

fn status(device: &TraceDevice) -> Result<()> {
    let mut state = String::new();
    device.open_control()?.read_to_string(&mut state)?;

    let buffer = device.buffer();
    let range = buffer.region().range();
    println!("region:   {:#x}@{:#x}", range.size, range.start);
    if let Some(strategy) = buffer.region().strategy() {
        println!("strategy: {:?}", strategy);
    }
    println!("capacity: {}", buffer.capacity());
    println!("entries:  {}", buffer.count());
    print!("trace_on: {}", state);
    Ok(())
}

fn run(cli: &Cli, device: &TraceDevice, endpoints: &EndpointTable) -> Result<()> {
    match &cli.command {
        TraceCommand::Dump { format, output } => {
            let mut out = open_output(output.as_deref())?;
            dump(device, *format, &mut out)?;
            out.flush()?;
        }
        TraceCommand::Start => {
            switch(device, "start")?;
            let mut state = String::new();
            device.open_control()?.read_to_string(&mut state)?;
            print!("{}", state);
        }
        TraceCommand::Stop => {
            switch(device, "stop")?;
            println!("{}", device.buffer().count());
        }
        TraceCommand::Status => status(device)?,
        TraceCommand::Endpoints => {
            for (path, registration) in endpoints.iter() {
                println!("{:o} {}", registration.mode, path);
            }
        }
    }
    Ok(())
}

fn main() -> Result<()> {
    let args = Cli::parse();

    // Initialize tracing if --debug flag is set
    init_tracing(args.debug);

    let config = args.device_config()?;
    let device = TraceDevice::from_config(&DeviceSlot::global(), &config)
        .context("failed to attach trace buffer")?;

    let mut endpoints = EndpointTable::new();
    device.register_endpoints(&mut endpoints)?;

    let result = run(&args, &device, &endpoints);
    device.detach(&mut endpoints);
    result
}
