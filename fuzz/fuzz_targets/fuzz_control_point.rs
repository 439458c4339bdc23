#![no_main]
use libfuzzer_sys::fuzz_target;
use trainer_core::{AckFrame, ControlRequest};

fuzz_target!(|data: &[u8]| {
    let Some(&op) = data.first() else { return };
    let ack = match ControlRequest::from_bytes(data) {
        Ok(req) => {
            assert_eq!(req.opcode(), op);
            if let ControlRequest::SetSimulation(p) = req {
                assert!(p.grade_percent().is_finite());
            }
            AckFrame::new(op, trainer_core::ResultCode::Success)
        }
        Err(e) => AckFrame::new(op, e.result_code()),
    };
    assert_eq!(ack.to_bytes()[1], op);
});
