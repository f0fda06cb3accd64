use std::time::Duration;

use anyhow::Context;
use rppal::uart::{Parity, Uart};

pub const BAUD_RATE: u32 = 9600;
pub const PARITY: Parity = Parity::None;
pub const DATA_BITS: u8 = 8;
pub const STOP_BITS: u8 = 1;

pub const FRAME_LEN: usize = 9;
pub const READ_TIMEOUT: Duration = Duration::from_millis(10);

pub const START_BYTE: u8 = 0xff;
pub const SENSOR_NUMBER: u8 = 0x01;
pub const READ_CO2_COMMAND: u8 = 0x86;

pub const READ_COMMAND: [u8; FRAME_LEN] = command_frame(READ_CO2_COMMAND);

/// Builds a request frame with an all-zero payload.
pub const fn command_frame(command: u8) -> [u8; FRAME_LEN] {
    let mut frame = [0u8; FRAME_LEN];
    frame[0] = START_BYTE;
    frame[1] = SENSOR_NUMBER;
    frame[2] = command;
    frame[8] = checksum(&frame);
    frame
}

/// Negated sum of bytes 1..=7, as the sensor computes it.
pub const fn checksum(frame: &[u8; FRAME_LEN]) -> u8 {
    let mut sum: u8 = 0;
    let mut i = 1;
    while i < FRAME_LEN - 1 {
        sum = sum.wrapping_add(frame[i]);
        i += 1;
    }
    (0xff - sum).wrapping_add(1)
}

/// Extracts the CO₂ concentration in ppm from a read response.
pub fn parse_co2_response(frame: &[u8; FRAME_LEN]) -> Result<u16, anyhow::Error> {
    if frame[0] != START_BYTE || frame[1] != READ_CO2_COMMAND {
        return Err(anyhow::anyhow!(
            "Invalid response: expected start byte {:#04x} and command {:#04x}, got {:#04x} and {:#04x}",
            START_BYTE,
            READ_CO2_COMMAND,
            frame[0],
            frame[1]
        ));
    }

    let expected = checksum(frame);
    if frame[8] != expected {
        return Err(anyhow::anyhow!(
            "Invalid checksum: expected {:#04x}, got {:#04x}",
            expected,
            frame[8]
        ));
    }

    Ok(u16::from_be_bytes([frame[2], frame[3]]))
}

#[derive(Debug)]
pub struct MHZ19C {
    uart: Uart,
}

impl MHZ19C {
    pub fn new() -> Result<MHZ19C, anyhow::Error> {
        let uart = Uart::new(BAUD_RATE, PARITY, DATA_BITS, STOP_BITS)
            .context("Failed to initialize UART")?;

        Ok(MHZ19C { uart })
    }

    pub fn init(&mut self) -> Result<(), anyhow::Error> {
        self.uart
            .set_read_mode(FRAME_LEN as u8, READ_TIMEOUT)
            .context("Failed to set read mode")?;

        Ok(())
    }

    pub fn read_co2_concentration(&mut self) -> Result<u16, anyhow::Error> {
        self.uart
            .write(&READ_COMMAND)
            .context("Failed to write command to UART")?;

        let mut response = [0u8; FRAME_LEN];
        let read = self
            .uart
            .read(&mut response)
            .context("Failed to read response from UART")?;
        if read != FRAME_LEN {
            return Err(anyhow::anyhow!(
                "Short response: expected {FRAME_LEN} bytes, got {read}"
            ));
        }

        parse_co2_response(&response)
    }
}
