//! Events from a MIDI input device.

use cadence_core::{
    AudioFormat, Event, MidiBackend, MidiDevice, MidiInput, NodeCreateContext, NodeDescriptor,
    NodeProcessor, NodeWaker, PortDescriptor, Result, RunContext,
};
use std::sync::Arc;

pub const OUT_PORT: usize = 0;

/// Emits messages received from a MIDI device.
///
/// Messages carry no musical time of their own: each one is stamped at the start of
/// the window the consumer asks for next, so it sounds as soon as possible.
pub struct MidiInputNode {
    backend: Arc<dyn MidiBackend>,
    device: MidiDevice,
    waker: NodeWaker,
    input: Option<Box<dyn MidiInput>>,
}

impl NodeProcessor for MidiInputNode {
    fn run(&mut self, ctx: &mut RunContext<'_>) {
        let Some(input) = self.input.as_mut() else {
            return;
        };
        let Some(mut out) = ctx.events_out(OUT_PORT) else {
            return;
        };
        let available = out.time_available();
        let requested = out.time_requested();
        if requested <= available {
            return;
        }
        while out.free_events() > 0 {
            let Some(kind) = input.pop() else { break };
            out.write(&Event::new(available, kind));
        }
        out.publish(requested);
        ctx.set_timestamp(requested);
    }

    fn port_connected(&mut self, _port: usize, _format: Option<&AudioFormat>) -> Result<()> {
        let input = self.backend.open_input(&self.device, self.waker.clone())?;
        tracing::info!("Opened MIDI input {}", input.device().name);
        self.input = Some(input);
        Ok(())
    }

    fn port_disconnected(&mut self, _port: usize) {
        self.input = None;
    }
}

/// A source node for a MIDI input device.
pub fn midi_input_descriptor(
    backend: Arc<dyn MidiBackend>,
    device: MidiDevice,
) -> Result<Arc<NodeDescriptor>> {
    NodeDescriptor::builder(format!("midi:{}", device.id), device.name.clone())
        .port(PortDescriptor::events_out("events_out"))
        .build(move |ctx: &NodeCreateContext<'_>| {
            Ok(Box::new(MidiInputNode {
                backend: Arc::clone(&backend),
                device: device.clone(),
                waker: ctx.waker.clone(),
                input: None,
            }) as Box<dyn NodeProcessor>)
        })
}
