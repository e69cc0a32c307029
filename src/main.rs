mod config;
mod logging;

use std::{cell::RefCell, f32::consts::TAU, process::ExitCode, rc::Rc, sync::Arc, time::Duration};

use lv2host_engine::builtin::{AMP_URI, Amp};
use lv2host_engine::{
    Instance, PluginProvider, PortFlow, PortType, RunHandle, World, drain_period,
    spawn_port_event_drain,
};
use tokio::task::LocalSet;
use tracing::{debug, error, info, warn};

use crate::config::AppConfig;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    logging::init_tracing();
    let config = match AppConfig::load(std::env::args().skip(1)) {
        Ok(config) => config,
        Err(e) => {
            error!("{e}");
            return ExitCode::FAILURE;
        }
    };
    let local = LocalSet::new();
    match local.run_until(run(config)).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn build_world(config: &AppConfig) -> World {
    let world = World::new(config.host.clone());
    #[cfg(all(feature = "suil", unix, not(target_os = "macos")))]
    let world = world.with_ui_loader(Arc::new(lv2host_engine::suil::SuilLoader));
    world
}

fn resolve_provider(uri: &str) -> Result<Arc<dyn PluginProvider>, String> {
    if uri == AMP_URI {
        return Ok(Arc::new(Amp::new().map_err(|e| e.to_string())?));
    }
    installed_plugin(uri)
}

#[cfg(all(feature = "lilv", unix, not(target_os = "macos")))]
fn installed_plugin(uri: &str) -> Result<Arc<dyn PluginProvider>, String> {
    let catalog = lv2host_engine::lilv::LilvCatalog::new();
    let plugin = catalog.plugin(uri).map_err(|e| e.to_string())?;
    Ok(Arc::new(plugin))
}

#[cfg(not(all(feature = "lilv", unix, not(target_os = "macos"))))]
fn installed_plugin(uri: &str) -> Result<Arc<dyn PluginProvider>, String> {
    Err(format!(
        "Plugin '{uri}' is not built in; rebuild with the `lilv` feature to host installed plugins"
    ))
}

fn describe(instance: &Instance) {
    let descriptor = instance.descriptor();
    info!(
        "{} ({}) by {}: {} ports",
        descriptor.name,
        descriptor.class_label,
        if descriptor.author.is_empty() { "unknown" } else { &descriptor.author },
        instance.port_count()
    );
    for port in descriptor.ports.iter() {
        let range = port
            .range
            .map(|r| format!(" [{} .. {}, default {}]", r.min, r.max, r.default))
            .unwrap_or_default();
        debug!(
            "  #{} {} '{}' {:?} {:?}{range}",
            port.index, port.symbol, port.name, port.port_type, port.flow
        );
        for point in &port.scale_points {
            debug!("      {} = {}", point.label, point.value);
        }
    }
}

/// Feeds a sine into every audio input for `cycles` blocks and returns the
/// output peak.
fn drive_audio(
    handle: RunHandle,
    inputs: usize,
    outputs: usize,
    block_size: u32,
    cycles: u32,
    sample_rate: f64,
) -> f32 {
    let frames = block_size as usize;
    let mut input_buffers = vec![vec![0.0_f32; frames]; inputs];
    let mut output_buffers = vec![vec![0.0_f32; frames]; outputs];
    let step = 440.0 / sample_rate as f32;
    let block = Duration::from_secs_f64(f64::from(block_size) / sample_rate);
    let mut phase = 0.0_f32;
    let mut peak = 0.0_f32;
    for _ in 0..cycles {
        for i in 0..frames {
            let sample = (phase * TAU).sin() * 0.5;
            for buffer in input_buffers.iter_mut() {
                buffer[i] = sample;
            }
            phase = (phase + step).fract();
        }
        let ins: Vec<&[f32]> = input_buffers.iter().map(Vec::as_slice).collect();
        let mut outs: Vec<&mut [f32]> = output_buffers.iter_mut().map(Vec::as_mut_slice).collect();
        handle.process(&ins, &mut outs, block_size);
        peak = output_buffers
            .iter()
            .flatten()
            .fold(peak, |peak, sample| peak.max(sample.abs()));
        std::thread::sleep(block);
    }
    peak
}

async fn run(config: AppConfig) -> Result<(), String> {
    let world = Arc::new(build_world(&config));
    let provider = resolve_provider(&config.plugin)?;
    let mut instance = Instance::new(world, provider);
    describe(&instance);

    instance
        .instantiate(config.sample_rate)
        .map_err(|e| e.to_string())?;
    instance.activate();
    instance.set_port_notify(|event| match event.as_float() {
        Some(value) => debug!("Port {} -> {value}", event.port),
        None => debug!(
            "Port {} -> {} byte event (protocol {})",
            event.port,
            event.size(),
            event.protocol
        ),
    });
    for (symbol, value) in &config.controls {
        match instance.write_control(symbol, *value) {
            Ok(true) => {}
            Ok(false) => warn!("Control write to '{symbol}' was dropped"),
            Err(e) => warn!("{e}"),
        }
    }
    match instance.create_editor() {
        Ok(editor) => match editor.instantiate(std::ptr::null_mut()) {
            Ok(()) => info!("Editor {} loaded", editor.ui().uri),
            Err(e) => warn!("{e}"),
        },
        Err(e) => debug!("{e}"),
    }

    let inputs = instance.port_count_of(PortType::Audio, PortFlow::Input) as usize;
    let outputs = instance.port_count_of(PortType::Audio, PortFlow::Output) as usize;
    let handle = instance.run_handle();
    let instance = Rc::new(RefCell::new(instance));
    let drain = spawn_port_event_drain(Rc::downgrade(&instance), drain_period(&config.host));

    let (block_size, cycles, sample_rate) = (config.block_size, config.cycles, config.sample_rate);
    info!("Running {cycles} cycles of {block_size} frames at {sample_rate} Hz");
    let peak = tokio::task::spawn_blocking(move || {
        drive_audio(handle, inputs, outputs, block_size, cycles, sample_rate)
    })
    .await
    .map_err(|e| format!("Audio thread failed: {e}"))?;
    info!("Output peak {peak:.3}");

    let state = {
        let mut instance = instance.borrow_mut();
        instance.send_port_events();
        if instance.dropped_events() > 0 {
            warn!("{} port events were dropped", instance.dropped_events());
        }
        let state = instance.get_state_string().map_err(|e| e.to_string());
        instance.deactivate();
        state?
    };
    println!("{state}");

    drop(instance);
    drain
        .await
        .map_err(|e| format!("Port event drain failed: {e}"))?;
    Ok(())
}
