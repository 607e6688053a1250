//! Waveform playback on a simulated DAC pod.
//!
//! Demonstrated here:
//!   * Packing a two-channel waveform into sample words
//!   * Playing it a fixed number of times
//!   * Looping it continuously until another thread says stop

use std::{f64::consts::TAU, thread, time::Duration};

use zmod::{
    DescriptorRing, FixedPointCodec, GenerateController, SessionConfig,
    dma::Direction,
    logging::init_logging,
    sim::SimBoard,
};

use tracing::info;

const MODEL: &str = "Zmod DAC 1411-125";
const PERIOD: usize = 1024;

fn main() {
    let _session = init_logging("./logs".as_ref(), "generate_waveform").unwrap();

    let board = SimBoard::new();
    let config = SessionConfig::for_model(MODEL).unwrap();
    let codec = FixedPointCodec::new(config.family.clone()).unwrap();

    // Sine on channel 1, cosine on channel 2
    let gain = config.channels[0].gain;
    let amplitude = 0.9 * config.family.full_scale(gain);
    let words: Vec<u32> = (0..PERIOD)
        .map(|i| {
            let phase = TAU * i as f64 / PERIOD as f64;
            codec.pack([
                codec.volts_to_raw(amplitude * phase.sin(), gain),
                codec.volts_to_raw(amplitude * phase.cos(), gain),
            ])
        })
        .collect();
    let buffer = board.alloc_buffer(PERIOD);
    buffer.write(0, &words).unwrap();

    let ring = DescriptorRing::new(board.dma(Direction::Mm2s), config.dma.max_block_bytes).unwrap();
    let mut generate = GenerateController::new(ring, board.awg());
    generate.configure_channels(&config.channels).unwrap();
    generate.load_waveform(buffer, PERIOD).unwrap();

    let report = generate.play_repeated(5).unwrap();
    info!(
        "Played {} passes, {} blocks resubmitted, {} words out",
        report.passes,
        report.blocks_resubmitted,
        board.awg_output().len()
    );

    // Stop continuous playback from another thread
    let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(1);
    let stopper = thread::spawn(move || {
        thread::sleep(Duration::from_millis(20));
        let _ = stop_tx.send(());
    });
    let report = generate.play_continuous(stop_rx).unwrap();
    stopper.join().unwrap();
    info!("Continuous playback ran {} passes", report.passes);
}
