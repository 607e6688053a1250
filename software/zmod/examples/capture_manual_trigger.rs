//! Triggered capture on a simulated ADC pod.
//!
//! Demonstrated here:
//!   * Reading calibration from the pod EEPROM and uploading it
//!   * Arming a capture with the trigger a quarter of the way in
//!   * Firing the manual trigger and collecting the ordered window
//!   * Converting packed sample words to volts

use zmod::{
    CalibrationStore, CaptureController, DescriptorRing, FixedPointCodec, SessionConfig,
    ZmodFamily,
    dma::Direction,
    logging::init_logging,
    sim::{SimBoard, SimEeprom},
    trigger::MANUAL_TRIGGER_CAUSE,
};
use zmod_shared::calibration::CalibrationRecord;

use tracing::info;

const MODEL: &str = "Zmod ADC 1410-125";
const BUFFER_LEN: usize = 8192;

fn main() {
    let session = init_logging("./logs".as_ref(), "capture_manual_trigger").unwrap();
    info!("Logging to {}", session.path().display());

    // Hardware out of the loop
    let board = SimBoard::new();
    let factory = CalibrationRecord {
        id: 0xAD,
        date: 1_700_000_000,
        cal: [0.012, 0.004, -0.003, 0.001, 0.010, -0.002, 0.008, 0.0005],
    };
    let mut eeprom = SimEeprom::new(MODEL, Some(factory), None);
    let calibration = CalibrationStore::load(&mut eeprom, ZmodFamily::Adc).unwrap();

    let config = SessionConfig::for_model(MODEL).unwrap();
    let ring = DescriptorRing::new(board.dma(Direction::S2mm), config.dma.max_block_bytes).unwrap();
    let mut capture = CaptureController::new(ring, board.trigger(), board.scope(), config.trigger.clone())
        .with_manual_trigger(Box::new(board.manual_trigger()));

    capture.upload_calibration(calibration.active()).unwrap();
    capture.configure_channels(&config.channels).unwrap();
    capture.attach_buffer(board.alloc_buffer(BUFFER_LEN)).unwrap();

    capture
        .arm(BUFFER_LEN, BUFFER_LEN / 4, MANUAL_TRIGGER_CAUSE)
        .unwrap();

    // Let the pre-trigger portion fill before firing
    board.advance(BUFFER_LEN);
    capture.trigger_manually().unwrap();
    let window = capture.capture().unwrap();

    info!(
        "Window at 0x{:08x}: start index {}, trigger at {}, cause 0x{:x}",
        window.buffer_base(),
        window.start_index(),
        window.trigger_position_index(),
        window.trigger_cause_mask()
    );

    let codec = FixedPointCodec::new(calibration.constants().clone()).unwrap();
    let gain = config.channels[0].gain;
    let pair = calibration.active().get(0, gain);
    let around = window.trigger_position_index() - 2..window.trigger_position_index() + 3;
    for i in around {
        let word = window.sample(i).unwrap();
        let raw = codec.extract_channel(word, 0).unwrap();
        info!(
            "sample {i}: word 0x{word:08x} ch1 {raw} -> {:.4} V ({:.4} V calibrated)",
            codec.raw_to_volts(raw, gain),
            codec.calibrated_volts(raw, gain, pair)
        );
    }
}
