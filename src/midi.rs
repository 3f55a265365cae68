//! Pad controller I/O over midir.
//!
//! Input runs on midir's own thread and only parses bytes into `PadEvent`s
//! and pushes them down a channel; the host loop drains it. Output sends
//! one note-on per LED.

use crossbeam_channel::Sender;
use midir::{Ignore, MidiInput, MidiInputConnection, MidiOutput, MidiOutputConnection};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::shared::{LedColor, LedSink, Note, PadEvent};

const CLIENT_NAME: &str = "padseq";

/// Parses a raw message. Only note on/off on any channel are pad events;
/// note-on with velocity 0 is a release.
pub fn parse_pad_message(bytes: &[u8]) -> Option<PadEvent> {
    let [status, note, velocity, ..] = *bytes else {
        return None;
    };
    if note > 127 || velocity > 127 {
        return None;
    }
    match status & 0xF0 {
        0x90 if velocity > 0 => Some(PadEvent {
            note: Note(note),
            velocity: velocity as f32 / 127.0,
            pressed: true,
        }),
        0x90 | 0x80 => Some(PadEvent { note: Note(note), velocity: 0.0, pressed: false }),
        _ => None,
    }
}

pub fn led_message(note: Note, color: LedColor) -> [u8; 3] {
    [0x90, note.0 & 0x7F, color.velocity()]
}

fn port_matches(name: &str, filter: Option<&str>) -> bool {
    filter.is_none_or(|f| name.contains(f))
}

/// Open connection from a pad controller. Dropping it disconnects.
pub struct MidiPadInput {
    port_name: String,
    _connection: MidiInputConnection<()>,
}

impl MidiPadInput {
    /// Connects to the first input port whose name contains `filter` (or the
    /// first port at all) and forwards pad events to `tx`.
    pub fn connect(filter: Option<&str>, tx: Sender<PadEvent>) -> Result<Self> {
        let mut midi_in = MidiInput::new(CLIENT_NAME).map_err(|e| Error::Midi(e.to_string()))?;
        midi_in.ignore(Ignore::Sysex | Ignore::Time | Ignore::ActiveSense);

        let (port, port_name) = midi_in
            .ports()
            .into_iter()
            .find_map(|p| {
                let name = midi_in.port_name(&p).ok()?;
                port_matches(&name, filter).then_some((p, name))
            })
            .ok_or_else(|| Error::Midi(format!("no midi input matching {:?}", filter.unwrap_or("*"))))?;

        let connection = midi_in
            .connect(
                &port,
                "padseq-in",
                move |_stamp, message, _| {
                    if let Some(event) = parse_pad_message(message) {
                        // host loop gone or backed up: dropping a hit beats blocking midir
                        let _ = tx.try_send(event);
                    }
                },
                (),
            )
            .map_err(|e| Error::Midi(e.to_string()))?;

        info!(port = %port_name, "midi input connected");
        Ok(Self { port_name, _connection: connection })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

/// LED feedback to the controller.
pub struct MidiLedOutput {
    port_name: String,
    connection: MidiOutputConnection,
}

impl MidiLedOutput {
    pub fn connect(filter: Option<&str>) -> Result<Self> {
        let midi_out = MidiOutput::new(CLIENT_NAME).map_err(|e| Error::Midi(e.to_string()))?;
        let (port, port_name) = midi_out
            .ports()
            .into_iter()
            .find_map(|p| {
                let name = midi_out.port_name(&p).ok()?;
                port_matches(&name, filter).then_some((p, name))
            })
            .ok_or_else(|| Error::Midi(format!("no midi output matching {:?}", filter.unwrap_or("*"))))?;

        let connection = midi_out
            .connect(&port, "padseq-out")
            .map_err(|e| Error::Midi(e.to_string()))?;

        info!(port = %port_name, "midi output connected");
        Ok(Self { port_name, connection })
    }

    pub fn port_name(&self) -> &str {
        &self.port_name
    }
}

impl LedSink for MidiLedOutput {
    fn set_led(&mut self, note: Note, color: LedColor) {
        if let Err(e) = self.connection.send(&led_message(note, color)) {
            warn!(note = note.0, error = %e, "led update failed");
        } else {
            debug!(note = note.0, ?color, "led");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_on_is_a_press() {
        let e = parse_pad_message(&[0x99, 36, 127]).unwrap();
        assert_eq!(e.note, Note(36));
        assert!(e.pressed);
        assert_eq!(e.velocity, 1.0);
    }

    #[test]
    fn zero_velocity_and_note_off_are_releases() {
        assert!(!parse_pad_message(&[0x90, 40, 0]).unwrap().pressed);
        assert!(!parse_pad_message(&[0x80, 40, 64]).unwrap().pressed);
    }

    #[test]
    fn other_messages_are_ignored() {
        assert_eq!(parse_pad_message(&[0xB0, 1, 64]), None);
        assert_eq!(parse_pad_message(&[0x90, 36]), None);
        assert_eq!(parse_pad_message(&[]), None);
        assert_eq!(parse_pad_message(&[0xF8, 0, 0]), None);
    }

    #[test]
    fn led_message_is_one_note_on() {
        assert_eq!(led_message(Note(36), LedColor::Green), [0x90, 36, 21]);
        assert_eq!(led_message(Note(37), LedColor::Off), [0x90, 37, 0]);
    }

    #[test]
    fn port_filter_is_substring() {
        assert!(port_matches("Launchpad Mini MIDI 1", Some("Launchpad")));
        assert!(!port_matches("IAC Bus", Some("Launchpad")));
        assert!(port_matches("IAC Bus", None));
    }
}
