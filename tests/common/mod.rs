#![allow(dead_code)]

use std::f64::consts::FRAC_PI_2;

use camino::{Utf8Path, Utf8PathBuf};
use nalgebra::{Matrix3, Rotation3, Unit, Vector3, Vector4};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rand_distr::{Distribution, Normal};

use planetcal::calibration::conf::CalibrationConf;
use planetcal::calibration::data::{CalibrationData, Device, FpaTemperatures};
use planetcal::calibration::Tag;
use planetcal::file_name::FileResolver;
use planetcal::label::{CachedTable, Group, Label};
use planetcal::spice::camera::CameraIds;
use planetcal::spice::frame_transform::m2q;
use planetcal::spice::memory_pool::{FrameRelation, MemoryKernelPool, SclkModel};

pub const SPACECRAFT: i32 = -74000;
pub const HIRISE: i32 = -74690;
pub const J2000: i32 = 1;
pub const IAU_MARS: i32 = 10014;
pub const MRO_CLOCK: i32 = -74;
pub const TICKS_PER_SECOND: f64 = 65536.0;
pub const MARS_RATE: f64 = 7.088e-5;

/// Kernel files with proper NAIF id words, in a temporary directory.
pub struct KernelDir {
    _dir: tempfile::TempDir,
    pub root: Utf8PathBuf,
}

pub fn kernel_dir() -> KernelDir {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let files: [(&str, &[u8]); 6] = [
        ("mro_sc_psp_061114.bc", b"DAF/CK  "),
        ("mro_psp.bsp", b"DAF/SPK "),
        ("mro_v15.tf", b"KPL/FK\n"),
        ("MRO_SCLKSCET.00038.65536.tsc", b"KPL/SCLK\n"),
        ("naif0012.tls", b"KPL/LSK\n"),
        ("hiriseAddendum006.ti", b"\\begindata\n"),
    ];
    for (name, head) in files {
        std::fs::write(root.join(name), head).unwrap();
    }
    KernelDir { _dir: dir, root }
}

pub fn resolver(root: &Utf8Path) -> FileResolver {
    FileResolver::new().with_data_area("mro", root.to_path_buf())
}

pub fn kernels_group() -> Group {
    Group::new()
        .with("InstrumentPointing", &["$mro/mro_sc_psp_061114.bc", "Table"])
        .with("InstrumentPosition", &["$mro/mro_psp.bsp", "Table"])
        .with("Frame", &["$mro/mro_v15.tf"])
        .with("InstrumentAddendum", &["$mro/hiriseAddendum006.ti"])
        .with("LeapSecond", &["$mro/naif0012.tls"])
        .with("SpacecraftClock", &["$mro/MRO_SCLKSCET.00038.65536.tsc"])
        .with("CameraVersion", &[1])
}

/// Pointing spinning about z at `rate` rad/s, consistent with `dR/dt = −R·[av×]`.
pub fn spinning_quaternion(et: f64, rate: f64) -> Vector4<f64> {
    m2q(&Rotation3::new(Vector3::new(0.0, 0.0, -rate * et)).into_inner())
}

pub fn pointing_table(first_et: f64, step: f64, count: usize, with_av: bool) -> CachedTable {
    let rate = 0.01;
    let records = (0..count)
        .map(|i| {
            let et = first_et + i as f64 * step;
            let q = spinning_quaternion(et, rate);
            let mut row = vec![q[0], q[1], q[2], q[3]];
            if with_av {
                row.extend([0.0, 0.0, rate]);
            }
            row.push(et);
            row
        })
        .collect();
    CachedTable::new("InstrumentPointing", records)
        .with_keyword("TimeDependentFrames", &[SPACECRAFT, J2000])
}

pub fn position_table(first_et: f64, step: f64, count: usize, with_velocity: bool) -> CachedTable {
    let velocity = Vector3::new(-1.2, 3.1, 0.4);
    let records = (0..count)
        .map(|i| {
            let et = first_et + i as f64 * step;
            let p = Vector3::new(3500.0, -120.0, 800.0) + velocity * (et - first_et);
            let mut row = vec![p.x, p.y, p.z];
            if with_velocity {
                row.extend([velocity.x, velocity.y, velocity.z]);
            }
            row.push(et);
            row
        })
        .collect();
    CachedTable::new("InstrumentPosition", records)
}

pub fn image_label(pointing: CachedTable, position: CachedTable) -> Label {
    Label::new()
        .with_file_name("/data/PSP_001337_1800_RED5.cub")
        .with_group("Kernels", kernels_group())
        .with_group(
            "Instrument",
            Group::new()
                .with("InstrumentId", &["HIRISE"])
                .with("TargetName", &["Mars"]),
        )
        .with_group("Archive", Group::new().with("ProductId", &["PSP_001337_1800"]))
        .with_table(pointing)
        .with_table(position)
}

/// Spacecraft bus to HiRISE: a quarter turn about z.
pub fn hirise_alignment() -> Matrix3<f64> {
    Rotation3::from_axis_angle(&Vector3::z_axis(), FRAC_PI_2).into_inner()
}

pub fn mro_pool() -> MemoryKernelPool {
    MemoryKernelPool::new()
        .with_frame(J2000, "J2000")
        .with_frame(SPACECRAFT, "MRO_SPACECRAFT")
        .with_frame(HIRISE, "MRO_HIRISE_OPTICAL_AXIS")
        .with_frame(IAU_MARS, "IAU_MARS")
        .with_relation(
            "MRO_SPACECRAFT",
            "MRO_HIRISE_OPTICAL_AXIS",
            FrameRelation::Fixed(hirise_alignment()),
        )
        .with_relation(
            "J2000",
            "IAU_MARS",
            FrameRelation::Spin {
                axis: Unit::new_normalize(Vector3::new(0.0, 0.0, 1.0)),
                rate: MARS_RATE,
                phase: 0.3,
            },
        )
        .with_clock(
            MRO_CLOCK,
            SclkModel {
                et_epoch: 0.0,
                tick_offset: 1.0e9,
                ticks_per_second: TICKS_PER_SECOND,
            },
        )
}

pub fn spacecraft_camera() -> CameraIds {
    CameraIds {
        ck_frame_id: SPACECRAFT,
        ck_reference_id: J2000,
        sclk_code: MRO_CLOCK,
        spk_target_id: -74,
        spk_center_id: 499,
        spk_reference_id: J2000,
    }
}

pub fn hirise_camera() -> CameraIds {
    CameraIds {
        ck_frame_id: HIRISE,
        spk_reference_id: IAU_MARS,
        ..spacecraft_camera()
    }
}

/// The drift series `5 + 0.1·t + 2·exp(−0.01·t)` at 200 unit-spaced times, with Gaussian noise.
pub fn synthetic_drift(sigma: f64, seed: u64) -> (Vec<f64>, Vec<f64>) {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, sigma).unwrap();
    let t: Vec<f64> = (0..200).map(f64::from).collect();
    let y = t
        .iter()
        .map(|t| 5.0 + 0.1 * t + 2.0 * (-0.01 * t).exp() + noise.sample(&mut rng))
        .collect();
    (t, y)
}

/// Image metadata with buffer and reverse-clock pixels around a bias of `bias` DN.
pub fn calibration_data(lines: usize, samples: usize, bias: f64, seed: u64) -> CalibrationData {
    let mut rng = StdRng::seed_from_u64(seed);
    let noise = Normal::new(0.0, 0.5).unwrap();
    let mut data = CalibrationData::new(lines, samples, Device::new(5, 1, 128, 1), 99.0);
    data.fpa_temperature = FpaTemperatures { py: 20.5, my: 21.5 };
    data.sun_distance = Some(1.52);
    data.buffer = (0..lines)
        .map(|l| {
            let drift = bias + 3.0 * (-(l as f64) / 40.0).exp();
            (0..12).map(|_| drift + noise.sample(&mut rng)).collect()
        })
        .collect();
    data.reverse_clock = (0..20)
        .map(|_| (0..samples).map(|_| bias + noise.sample(&mut rng)).collect())
        .collect();
    data
}

/// A profile for every module; `Debug::SkipModule` set in the default profile when `skip_all`.
///
/// `ZeroDarkRate` is always skipped since it excludes `ZeroDark`.
pub fn calibration_conf(skip_all: bool) -> CalibrationConf {
    let mut conf = CalibrationConf::new().with_profile(
        "Hical",
        Group::new().with("Debug::SkipModule", &[skip_all]),
    );
    for tag in Tag::ALL {
        let group = match tag {
            Tag::Zdr => Group::new().with("Debug::SkipModule", &[true]),
            _ => Group::new(),
        };
        conf = conf.with_profile(tag.module_name(), group);
    }
    conf
}

/// Write the coefficient tables used by a full calibration run and return their directory.
pub fn coefficient_dir(samples: usize) -> KernelDir {
    let dir = tempfile::tempdir().unwrap();
    let root = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).unwrap();
    let column = |v: f64| (0..samples).map(|_| format!("{v}\n")).collect::<String>();
    std::fs::write(root.join("dark.csv"), column(2.0)).unwrap();
    std::fs::write(root.join("flats.csv"), column(1.0)).unwrap();
    let rates = (0..samples).map(|_| "1000,3000\n").collect::<String>();
    std::fs::write(root.join("dark_rate.csv"), format!("20,22\n{rates}")).unwrap();
    let band_rows = |row: &str| (0..28).map(|_| format!("{row}\n")).collect::<String>();
    std::fs::write(root.join("drift.csv"), band_rows("1.0,0.0,0.0,0.0")).unwrap();
    std::fs::write(root.join("nl.csv"), band_rows("0.0")).unwrap();
    std::fs::write(
        root.join("gains.csv"),
        format!("TDI8,TDI32,TDI64,TDI128\n{}", band_rows("1.0,1.0,1.0,2.0")),
    )
    .unwrap();
    KernelDir { _dir: dir, root }
}
