//! Dispatcher module - unsolicited event handling.
//!
//! Provides:
//! - [`DeviceEvent`] - a decoded unsolicited message
//! - [`ListenerRegistry`] - filtered callbacks for events
//! - the dispatcher task, which keeps the state mirror current after group
//!   broadcasts and fans events out to listeners
//!
//! # Example
//!
//! ```ignore
//! use insteon_gateway::dispatcher::ListenerFilter;
//!
//! // Fires whenever keypad button 3 sends a group ON.
//! modem.register_listener(
//!     Some(ListenerFilter::new().source(keypad).command(0x11).button(3)),
//!     |event| tracing::info!("button 3 on: {}", event.frame),
//! );
//! ```

mod event;
mod listener;

pub use event::{DeviceEvent, EventMessage};
pub use listener::{ListenerCallback, ListenerFilter, ListenerId, ListenerRegistry};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::commands::{LevelSource, LevelUnit};
use crate::modem::{Modem, WeakModem};
use crate::protocol::command;
use crate::reader::Envelope;

/// Spawn the dispatcher over the reader's event queue.
///
/// The task ends when the queue closes or the engine is dropped.
pub(crate) fn spawn_dispatcher(
    events: mpsc::UnboundedReceiver<Envelope>,
    modem: WeakModem,
) -> JoinHandle<()> {
    tokio::spawn(dispatch_loop(events, modem))
}

async fn dispatch_loop(mut events: mpsc::UnboundedReceiver<Envelope>, weak: WeakModem) {
    while let Some(envelope) = events.recv().await {
        let Some(modem) = weak.upgrade() else {
            break;
        };

        if envelope.epoch < modem.reset_count() {
            tracing::debug!("Dropping event from before reset: {}", envelope.frame);
            continue;
        }

        let event = DeviceEvent::decode(envelope.frame);
        tracing::debug!("Event {}", event.frame);

        update_mirror(&modem, &event);
        modem.listeners().notify(&event);
    }
    tracing::debug!("Dispatcher stopped");
}

/// Keep responders' levels current after a group ON, OFF or stop-fade.
fn update_mirror(modem: &Modem, event: &DeviceEvent) {
    let EventMessage::Insteon {
        from, button, cmd1, ..
    } = event.message
    else {
        return;
    };
    if !event.is_group_broadcast()
        || !matches!(
            cmd1,
            command::ON | command::OFF | command::STOP_CHANGE
        )
    {
        return;
    }

    let registry = modem.registry();
    for index in registry.responders_for(from, button) {
        let Some(address) = registry.address_for_index(index) else {
            continue;
        };
        let relay_only = registry
            .type_for_index(index)
            .map(|t| t.is_relay_only())
            .unwrap_or(false);

        if relay_only {
            match cmd1 {
                command::ON => registry.set_level_for_index(index, 0xFF),
                command::OFF => registry.set_level_for_index(index, 0x00),
                _ => {}
            }
            continue;
        }

        // The responder is still ramping; ask once it has settled.
        let weak = modem.downgrade();
        let delay = modem.config().settle_delay;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let Some(modem) = weak.upgrade() else {
                return;
            };
            if let Err(e) = modem
                .get_level(address, LevelUnit::Direct, LevelSource::Device)
                .await
            {
                tracing::warn!("Status refresh of {} failed: {}", address, e);
            }
        });
    }
}
