pub fn db_to_gain(db: f32) -> f32 {
    (10.0f32).powf(db / 20.0)
}

/// Linear gain to dB, floored at `floor_db` for silence.
pub fn gain_to_db(gain: f32, floor_db: f32) -> f32 {
    if gain <= db_to_gain(floor_db) {
        floor_db
    } else {
        20.0 * gain.log10()
    }
}

pub fn peak(x: &[f32]) -> f32 {
    x.iter().fold(0.0f32, |acc, s| acc.max(s.abs()))
}
