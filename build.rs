use std::env;
use std::fs::File;
use std::io::prelude::*;
use std::path::Path;

// IEC 60751 Callendar-Van Dusen coefficients
const A: f64 = 3.9083e-3;
const B: f64 = -5.775e-7;
const C: f64 = -4.183e-12;

fn pt100(t: f64) -> f64 {
    let c = if t < 0. { C * (t - 100.) * t * t * t } else { 0. };
    100. * (1. + A * t + B * t * t + c)
}

fn write_pt100_table() {
    const T_MIN: i32 = -200;
    const T_MAX: i32 = 850;

    let out_dir = env::var_os("OUT_DIR").unwrap();
    let dest_path = Path::new(&out_dir).join("pt100_table.rs");
    let mut file = File::create(dest_path).unwrap();

    writeln!(file, "pub(crate) const PT100_T_MIN: i32 = {};", T_MIN).unwrap();
    write!(
        file,
        "pub(crate) const PT100: [f64; {}] = [",
        T_MAX - T_MIN + 1
    )
    .unwrap();
    // Resistance at every whole degree Celsius
    for (i, t) in (T_MIN..=T_MAX).enumerate() {
        if i % 4 == 0 {
            write!(file, "\n   ").unwrap();
        }
        write!(file, " {:?},", pt100(t as f64)).unwrap();
    }
    writeln!(file, "\n];").unwrap();

    println!("cargo:rerun-if-changed=build.rs");
}

fn main() {
    write_pt100_table();
}
