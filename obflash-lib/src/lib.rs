//! ObFlash is a firmware flashing library for OB38S003 microcontrollers
//! programmed through a serial bridge running a line based bootloader
//!
//! ## Features
//! - Connect the bridge via UART serial port
//! - Handshake with the bridge and the target chip
//! - Erase flash memory on chip
//! - Write the configuration fuse
//! - Stream an Intel HEX image line by line, verifying every echo
//! - Reset the chip into the new firmware
//! - Recover from failed stages by resynchronizing with the bridge

#[macro_use]
extern crate lazy_static;

pub mod channel;
pub mod definitions;
pub mod image;
pub mod protocol;
pub mod response;
pub mod sequence;
pub mod session;

use channel::SerialChannel;
use definitions::{SessionConfig, Timings};
use image::Image;
use protocol::ProtocolError;
use serial::prelude::*;
use session::{EventSink, SessionResult};

/// Flashing session over one serial port
pub struct ObFlash {
    channel: SerialChannel<serial::SystemPort>,
}

impl ObFlash {
    /// Opens specified [serial_port] and does the initial serial setup
    pub fn new(serial_port: &str, baud: usize) -> Result<Self, ProtocolError> {
        let mut port = serial::open(serial_port)?;

        // Set timeout
        port.set_timeout(Timings::default().read_timeout)?;

        // Set port settings
        port.reconfigure(&|settings| {
            settings.set_baud_rate(serial::BaudRate::from_speed(baud))?;
            settings.set_char_size(serial::Bits8);
            settings.set_parity(serial::ParityNone);
            settings.set_stop_bits(serial::Stop1);
            settings.set_flow_control(serial::FlowNone);

            Ok(())
        })?;

        log::info!("Serial connection opened on {} at {} baud", serial_port, baud);

        Ok(ObFlash {
            channel: SerialChannel::new(port),
        })
    }

    /// Flash *image*; the port is closed when this returns
    pub fn flash(
        self,
        image: &Image,
        config: &SessionConfig,
        sink: &mut dyn EventSink,
    ) -> Result<SessionResult, ProtocolError> {
        session::run_session(self.channel, image, config, sink)
    }
}
