use mimalloc::MiMalloc;
use modefast::{Cbc, Cfb, CipherMode, Ctr, Ecb, ModeError, Ofb, Rijndael};
use std::env;
use std::error::Error;

#[global_allocator]
static GLOBAL: MiMalloc = MiMalloc;

static KEY: [u8; 32] = [
    0x60, 0x3D, 0xEB, 0x10, 0x15, 0xCA, 0x71, 0xBE, 0x2B, 0x73, 0xAE, 0xF0, 0x85, 0x7D, 0x77, 0x81,
    0x1F, 0x35, 0x2C, 0x07, 0x3B, 0x61, 0x08, 0xD7, 0x2D, 0x98, 0x10, 0xA3, 0x09, 0x14, 0xDF, 0xF4,
];
static IV: [u8; 16] = [
    0x00, 0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08, 0x09, 0x0A, 0x0B, 0x0C, 0x0D, 0x0E, 0x0F,
];

/// Encrypts then decrypts `text` and checks the round trip.
fn round_trip<M: CipherMode>(mut mode: M, text: &[u8]) -> Result<(), ModeError> {
    let mut sealed = vec![0u8; text.len()];
    mode.initialize(true, &KEY, &IV)?;
    mode.transform(text, &mut sealed)?;

    let mut opened = vec![0u8; text.len()];
    mode.initialize(false, &KEY, &IV)?;
    mode.transform(&sealed, &mut opened)?;

    assert_eq!(opened, text);
    println!(
        "{}: {} bytes, parallel {}, degree {}",
        mode.name(),
        text.len(),
        mode.is_parallel(),
        mode.profile().max_degree()
    );
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let args: Vec<String> = env::args().collect();
    if args.len() != 3 {
        let bin = args.first().map_or("modefast", String::as_str);
        return Err(format!("usage: {bin} <cbc|cfb|ctr|ofb|ecb> <blocks>").into());
    }
    let test = &args[1];
    let blocks = args[2].parse::<usize>()?;

    let text = b"abcdefghijklmnop".repeat(blocks);

    match &test[..] {
        "cbc" => round_trip(Cbc::new(Rijndael::new()), &text)?,
        "cfb" => round_trip(Cfb::new(Rijndael::new()), &text)?,
        "ctr" => round_trip(Ctr::new(Rijndael::new()), &text)?,
        "ofb" => round_trip(Ofb::new(Rijndael::new()), &text)?,
        "ecb" => round_trip(Ecb::new(Rijndael::new()), &text)?,
        _ => return Err(format!("unknown mode: {test}").into()),
    }
    Ok(())
}
