//! MIDI port discovery
//!
//! Uses midir for cross-platform MIDI I/O (ALSA on Linux, CoreMIDI on macOS, WinMM on Windows).
//! Ports are matched case-insensitively by substring, so a config entry like
//! `"digital piano"` survives ALSA client renumbering.

use midir::{MidiInput, MidiInputPort, MidiOutput, MidiOutputPort};

/// Error type for MIDI connection operations
#[derive(Debug, thiserror::Error)]
pub enum MidiConnectionError {
    #[error("Failed to initialize MIDI input: {0}")]
    InputInitError(String),

    #[error("Failed to initialize MIDI output: {0}")]
    OutputInitError(String),

    #[error("No MIDI ports available")]
    NoPorts,

    #[error("No MIDI port found matching pattern: {0}")]
    PortNotFound(String),

    #[error("Failed to connect to MIDI port: {0}")]
    ConnectionError(String),

    #[error("Failed to get port info: {0}")]
    PortInfoError(String),
}

/// Namespace for port lookup helpers
pub struct MidiConnection;

impl MidiConnection {
    /// Find the first input port whose name contains `port_match`
    ///
    /// Returns the MidiInput so the caller can attach its own callback.
    pub fn find_input_port(
        port_match: &str,
    ) -> Result<(MidiInput, MidiInputPort), MidiConnectionError> {
        let pattern = port_match.to_lowercase();

        let midi_in = MidiInput::new("keylight-in")
            .map_err(|e| MidiConnectionError::InputInitError(e.to_string()))?;

        let in_ports = midi_in.ports();
        if in_ports.is_empty() {
            return Err(MidiConnectionError::NoPorts);
        }

        let input_port = in_ports
            .into_iter()
            .find(|port| {
                midi_in
                    .port_name(port)
                    .map(|name| port_name_matches(&name, &pattern))
                    .unwrap_or(false)
            })
            .ok_or_else(|| MidiConnectionError::PortNotFound(port_match.to_string()))?;

        let port_name = midi_in
            .port_name(&input_port)
            .map_err(|e| MidiConnectionError::PortInfoError(e.to_string()))?;

        log::info!("MIDI: Found input port: {}", port_name);

        Ok((midi_in, input_port))
    }

    /// Find the first output port whose name contains `port_match`
    pub fn find_output_port(
        port_match: &str,
    ) -> Result<(MidiOutput, MidiOutputPort), MidiConnectionError> {
        let pattern = port_match.to_lowercase();

        let midi_out = MidiOutput::new("keylight-out")
            .map_err(|e| MidiConnectionError::OutputInitError(e.to_string()))?;

        let out_ports = midi_out.ports();
        if out_ports.is_empty() {
            return Err(MidiConnectionError::NoPorts);
        }

        let output_port = out_ports
            .into_iter()
            .find(|port| {
                midi_out
                    .port_name(port)
                    .map(|name| port_name_matches(&name, &pattern))
                    .unwrap_or(false)
            })
            .ok_or_else(|| MidiConnectionError::PortNotFound(port_match.to_string()))?;

        let port_name = midi_out
            .port_name(&output_port)
            .map_err(|e| MidiConnectionError::PortInfoError(e.to_string()))?;

        log::info!("MIDI: Found output port: {}", port_name);

        Ok((midi_out, output_port))
    }

    /// List all available MIDI input ports
    pub fn list_input_ports() -> Result<Vec<String>, MidiConnectionError> {
        let midi_in = MidiInput::new("keylight-list")
            .map_err(|e| MidiConnectionError::InputInitError(e.to_string()))?;

        Ok(midi_in
            .ports()
            .iter()
            .filter_map(|port| midi_in.port_name(port).ok())
            .collect())
    }

    /// List all available MIDI output ports
    pub fn list_output_ports() -> Result<Vec<String>, MidiConnectionError> {
        let midi_out = MidiOutput::new("keylight-list")
            .map_err(|e| MidiConnectionError::OutputInitError(e.to_string()))?;

        Ok(midi_out
            .ports()
            .iter()
            .filter_map(|port| midi_out.port_name(port).ok())
            .collect())
    }
}

/// Case-insensitive substring match; `pattern` must already be lowercase.
///
/// An empty pattern matches any port.
pub(crate) fn port_name_matches(port_name: &str, pattern: &str) -> bool {
    port_name.to_lowercase().contains(pattern)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_list_ports() {
        // Only verifies enumeration doesn't crash; availability depends on the system
        let _input_ports = MidiConnection::list_input_ports();
        let _output_ports = MidiConnection::list_output_ports();
    }

    #[test]
    fn test_port_name_matches() {
        assert!(port_name_matches("Digital Piano:Digital Piano MIDI 1 20:0", "digital piano"));
        assert!(port_name_matches("USB MIDI Interface [hw:1,0,0]", "usb midi"));
        assert!(port_name_matches("Anything", ""));
        assert!(!port_name_matches("Midi Through Port-0", "piano"));
    }
}
