use std::{
    path::*,
    cell::Cell,
    io::{Read, Write},
    net::TcpListener,
    thread::JoinHandle,
};
use chrono::prelude::*;
use fitsio::FitsFile;
use tempfile::tempdir;
use nightly_bias::{
    catalog::*,
    config::*,
    errors::*,
    exposure_ids::*,
    fits_header::*,
    launch_script::*,
    night::*,
    progress::*,
    provisioner::*,
    transfer::*,
    workflow::*,
};

const NIGHT: &str = "2023-10-15";

fn frame_file_name(expnum: i64) -> String {
    format!("c4d_{}_ori.fits.fz", expnum)
}

fn create_frame(path: &Path, expnum: Option<i64>, humidity: Option<&str>) {
    let mut fptr = FitsFile::create(path).open().unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    if let Some(expnum) = expnum {
        hdu.write_key(&mut fptr, "EXPNUM", expnum).unwrap();
    }
    hdu.write_key(&mut fptr, "OBSTYPE", "zero".to_string()).unwrap();
    hdu.write_key(&mut fptr, "OUTTEMP", 12.5_f64).unwrap();
    hdu.write_key(&mut fptr, "OUTPRESS", 780.0_f64).unwrap();
    hdu.write_key(&mut fptr, "WINDSPD", 3.2_f64).unwrap();
    hdu.write_key(&mut fptr, "WINDDIR", 270.0_f64).unwrap();
    if let Some(humidity) = humidity {
        hdu.write_key(&mut fptr, "OUTHUMID", humidity.to_string()).unwrap();
    }
}

fn read_float_key(path: &Path, key: &str) -> f64 {
    let mut fptr = FitsFile::open(path).unwrap();
    let hdu = fptr.primary_hdu().unwrap();
    hdu.read_key::<f64>(&mut fptr, key).unwrap()
}

fn record(expnum: i64, obstype: &str, remote_dir: &Path) -> ExposureRecord {
    ExposureRecord {
        expnum,
        obstype: obstype.to_string(),
        date_obs: NaiveDate::from_ymd_opt(2023, 10, 15).unwrap()
            .and_hms_opt(22, 0, 0).unwrap(),
        url: remote_dir.join(frame_file_name(expnum)).to_str().unwrap().to_string(),
        file_name: None,
    }
}

/// "Remote" frames are files in `remote_dir`, fetched with `LocatorTransfer`
fn remote_catalog(remote_dir: &Path, frames: &[(i64, &str)]) -> Vec<ExposureRecord> {
    frames
        .iter()
        .map(|(expnum, obstype)| {
            let rec = record(*expnum, obstype, remote_dir);
            create_frame(Path::new(&rec.url), Some(*expnum), Some("NaN"));
            rec
        })
        .collect()
}

struct VecCatalog {
    exposures: Vec<ExposureRecord>,
}

impl NightCatalog for VecCatalog {
    fn query_night(&self, night: &NightIdentifier) -> Result<NightSummary> {
        Ok(NightSummary {
            night: night.to_string(),
            exposures: self.exposures.clone(),
        })
    }
}

struct CountingTransfer {
    inner: LocatorTransfer,
    calls: Cell<usize>,
}

impl CountingTransfer {
    fn new() -> CountingTransfer {
        CountingTransfer {
            inner: LocatorTransfer::new().unwrap(),
            calls: Cell::new(0),
        }
    }
}

impl Transfer for CountingTransfer {
    fn download(&self, records: &[ExposureRecord], dest_dir: &Path) -> Result<()> {
        self.calls.set(self.calls.get() + 1);
        self.inner.download(records, dest_dir)
    }
}

#[derive(Default)]
struct RecordingProgress {
    steps: Vec<String>,
}

impl Progress for RecordingProgress {
    fn stage(&mut self, _text: &str) {}
    fn set_total(&mut self, _total: usize) {}
    fn progress(&mut self, step: bool, text: &str) {
        if step {
            self.steps.push(text.to_string());
        }
    }
}

fn test_config(work_dir: &Path) -> RunConfig {
    RunConfig {
        staging_dir: work_dir.join("raw"),
        script_name: work_dir.join("launch.sh"),
        ..RunConfig::default()
    }
}

#[test]
fn test_eight_zero_frames_pick_first_five() {
    let remote = tempdir().unwrap();
    let work = tempdir().unwrap();
    let mut frames = vec![(90, "object"), (91, "dome flat")];
    for expnum in [120, 115, 130, 101, 140, 133, 128, 119] {
        frames.push((expnum, "zero"));
    }
    let catalog = VecCatalog { exposures: remote_catalog(remote.path(), &frames) };

    let config = test_config(work.path());
    std::fs::create_dir(&config.staging_dir).unwrap();

    let transfer = CountingTransfer::new();
    let toolchain = LsstToolchain::decam();
    let mut progress = RecordingProgress::default();
    let night = NightIdentifier::parse(NIGHT).unwrap();

    let summary = run(&night, &config, Collaborators {
        catalog: &catalog,
        transfer: &transfer,
        toolchain: &toolchain,
        progress: &mut progress,
    }).unwrap();

    let selected: Vec<_> = summary.selection.iter().map(|r| r.expnum).collect();
    assert_eq!(selected, vec![120, 115, 130, 101, 140]);
    assert_eq!(
        summary.exposure_ids.to_biasexps_line(),
        "BIASEXPS=\"(101, 115, 120, 130, 140)\""
    );

    // frames are processed in file name order
    let frame_ids: Vec<_> = summary.frames.iter().map(|f| f.record.expnum).collect();
    assert_eq!(frame_ids, vec![101, 115, 120, 130, 140]);
    assert_eq!(progress.steps.len(), 5);
    assert_eq!(progress.steps[0], frame_file_name(101));

    for frame in summary.frames.iter() {
        assert_eq!(read_float_key(&frame.path, "OUTHUMID"), 0.0);
        assert_eq!(read_float_key(&frame.path, "OUTTEMP"), 12.5);
    }

    let text = std::fs::read_to_string(&config.script_name).unwrap();
    assert_eq!(
        parse_biasexps_line(&text),
        Some("BIASEXPS=\"(101, 115, 120, 130, 140)\"")
    );
    let raw_glob = format!("{}/*.fits.fz", config.staging_dir.to_str().unwrap());
    assert!(text.contains(&raw_glob));
    assert!(text.contains("detector=18"));
    assert!(text.contains("ingest_20231015.log"));

    #[cfg(unix)] {
        use std::os::unix::fs::PermissionsExt;
        let mode = std::fs::metadata(&config.script_name).unwrap().permissions().mode();
        assert_eq!(mode & 0o111, 0o111);
    }
}

#[test]
fn test_missing_staging_dir() {
    let remote = tempdir().unwrap();
    let work = tempdir().unwrap();
    let catalog = VecCatalog {
        exposures: remote_catalog(remote.path(), &[(1, "zero"), (2, "zero")]),
    };
    let config = test_config(work.path());

    let transfer = CountingTransfer::new();
    let toolchain = LsstToolchain::decam();
    let mut progress = RecordingProgress::default();
    let night = NightIdentifier::parse(NIGHT).unwrap();

    let err = run(&night, &config, Collaborators {
        catalog: &catalog,
        transfer: &transfer,
        toolchain: &toolchain,
        progress: &mut progress,
    }).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<BiasPrepError>(),
        Some(BiasPrepError::Precondition(_))
    ));
    assert_eq!(transfer.calls.get(), 0);
    assert!(!config.staging_dir.exists());
    assert!(!config.script_name.exists());
}

#[test]
fn test_no_zero_frames() {
    let remote = tempdir().unwrap();
    let work = tempdir().unwrap();
    let catalog = VecCatalog {
        exposures: remote_catalog(remote.path(), &[(1, "object"), (2, "dome flat")]),
    };
    let config = test_config(work.path());
    std::fs::create_dir(&config.staging_dir).unwrap();

    let transfer = CountingTransfer::new();
    let toolchain = LsstToolchain::decam();
    let mut progress = RecordingProgress::default();
    let night = NightIdentifier::parse(NIGHT).unwrap();

    let err = run(&night, &config, Collaborators {
        catalog: &catalog,
        transfer: &transfer,
        toolchain: &toolchain,
        progress: &mut progress,
    }).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<BiasPrepError>(),
        Some(BiasPrepError::Selection { .. })
    ));
    assert_eq!(transfer.calls.get(), 0);
    assert!(!config.script_name.exists());
}

#[test]
fn test_dry_run_from_catalog_file() {
    let remote = tempdir().unwrap();
    let work = tempdir().unwrap();
    let summary = NightSummary {
        night: NIGHT.to_string(),
        exposures: remote_catalog(remote.path(), &[(7, "zero"), (3, "bias"), (5, "object")]),
    };
    let catalog_file = work.path().join("night.json");
    std::fs::write(&catalog_file, serde_json::to_string(&summary).unwrap()).unwrap();

    let config = RunConfig {
        catalog: CatalogSource::File { path: catalog_file.clone() },
        ..test_config(work.path())
    };
    let catalog = create_catalog(&config.catalog).unwrap();
    let night = NightIdentifier::parse(NIGHT).unwrap();

    let result = dry_run(&night, &config, catalog.as_ref()).unwrap();
    assert_eq!(result.exposure_ids.to_biasexps_line(), "BIASEXPS=\"(3, 7)\"");
    assert!(result.frames.is_empty());
    assert!(result.script.is_none());
    assert!(!config.script_name.exists());

    // summary of other night is refused
    let other_night = NightIdentifier::parse("2023-10-16").unwrap();
    let err = dry_run(&other_night, &config, catalog.as_ref()).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<BiasPrepError>(),
        Some(BiasPrepError::CatalogUnavailable { .. })
    ));
}

#[test]
fn test_header_patch_is_idempotent() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(frame_file_name(42));
    create_frame(&path, Some(42), Some("NaN"));
    let patches = default_header_patches();

    let patched = patch_header(&path, &patches).unwrap();
    assert_eq!(patched, vec!["OUTHUMID".to_string()]);
    let once = std::fs::read(&path).unwrap();

    let patched = patch_header(&path, &patches).unwrap();
    assert!(patched.is_empty());
    let twice = std::fs::read(&path).unwrap();
    assert_eq!(once, twice);

    assert_eq!(read_float_key(&path, "OUTHUMID"), 0.0);
    assert_eq!(read_exposure_number(&path).unwrap(), 42);
}

#[test]
fn test_missing_header_key_is_added() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(frame_file_name(43));
    create_frame(&path, Some(43), None);

    let patches = vec![HeaderPatch { key: "OUTHUMID".to_string(), fill_value: 10.0 }];
    assert_eq!(find_header_defects(&path, &patches).unwrap().len(), 1);
    patch_header(&path, &patches).unwrap();
    assert!(find_header_defects(&path, &patches).unwrap().is_empty());
    assert_eq!(read_float_key(&path, "OUTHUMID"), 10.0);
}

#[test]
fn test_frame_without_expnum() {
    let dir = tempdir().unwrap();
    let path = dir.path().join(frame_file_name(44));
    create_frame(&path, None, Some("55.0"));
    let frame = LocalFrame {
        path: path.clone(),
        record: record(44, "zero", dir.path()),
    };

    let err = resolve(&[frame]).unwrap_err();
    assert!(matches!(err, BiasPrepError::MetadataMissing { ref key, .. } if key == "EXPNUM"));
}

#[test]
fn test_corrupted_frame_stops_provisioning() {
    let remote = tempdir().unwrap();
    let staging = tempdir().unwrap();
    let mut catalog = remote_catalog(remote.path(), &[(10, "zero")]);

    let broken = record(11, "zero", remote.path());
    std::fs::write(&broken.url, b"not a FITS file").unwrap();
    catalog.push(broken);

    let transfer = LocatorTransfer::new().unwrap();
    let mut progress = RecordingProgress::default();
    let err = provision(
        &catalog,
        staging.path(),
        "*.fits.fz",
        &transfer,
        &default_header_patches(),
        &mut progress,
    ).unwrap_err();

    match err {
        BiasPrepError::FrameCorruption { path, .. } =>
            assert!(path.ends_with(frame_file_name(11))),
        other =>
            panic!("unexpected error {:?}", other),
    }
}

#[test]
fn test_foreign_files_in_staging_are_ignored() {
    let remote = tempdir().unwrap();
    let staging = tempdir().unwrap();
    let catalog = remote_catalog(remote.path(), &[(20, "zero"), (21, "zero")]);
    create_frame(&staging.path().join(frame_file_name(5)), Some(5), Some("NaN"));
    std::fs::write(staging.path().join("notes.txt"), "x").unwrap();

    let transfer = LocatorTransfer::new().unwrap();
    let mut progress = RecordingProgress::default();
    let frames = provision(
        &catalog,
        staging.path(),
        "*.fits.fz",
        &transfer,
        &default_header_patches(),
        &mut progress,
    ).unwrap();

    assert_eq!(resolve_biasexps_line(&frames).unwrap(), "BIASEXPS=\"(20, 21)\"");
    assert_eq!(progress.steps, vec![frame_file_name(20), frame_file_name(21)]);
}

#[test]
fn test_script_round_trip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("launch.sh");
    let toolchain = LsstToolchain::decam();
    let composer = LaunchScriptComposer::new(&toolchain, "raw/*.fits.fz", "20231015");
    let script = composer.compose("repo", "BIASEXPS=\"(1,2,3)\"", &path).unwrap();
    script.write().unwrap();

    let text = std::fs::read_to_string(&path).unwrap();
    assert_eq!(text, script.render());
    assert_eq!(parse_biasexps_line(&text), Some("BIASEXPS=\"(1,2,3)\""));
    assert!(text.is_ascii());
    assert!(text.lines().all(|line| !line.is_empty()));

    // no temporary files left behind
    let entries: Vec<_> = std::fs::read_dir(dir.path()).unwrap().collect();
    assert_eq!(entries.len(), 1);
}

#[test]
fn test_unwritable_script_path() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("no_such_dir").join("launch.sh");
    let toolchain = LsstToolchain::decam();
    let composer = LaunchScriptComposer::new(&toolchain, "raw/*.fits.fz", "20231015");
    let script = composer.compose("repo", "BIASEXPS=\"(1)\"", &path).unwrap();

    let err = script.write().unwrap_err();
    assert!(matches!(err, BiasPrepError::ScriptWrite { .. }));
    assert!(!path.exists());
}

/// Nothing listens on port 1 of loopback
const DEAD_URL: &str = "http://127.0.0.1:1";

/// Answers one HTTP request with `response` and closes connection
fn serve_once(response: Vec<u8>) -> (String, JoinHandle<()>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let handle = std::thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut request = Vec::new();
        let mut buf = [0_u8; 1024];
        while !request.windows(4).any(|w| w == b"\r\n\r\n") {
            let len = stream.read(&mut buf).unwrap();
            if len == 0 { break; }
            request.extend_from_slice(&buf[..len]);
        }
        stream.write_all(&response).unwrap();
    });
    (url, handle)
}

fn http_record(expnum: i64, url: String) -> ExposureRecord {
    ExposureRecord {
        url,
        file_name: Some(frame_file_name(expnum)),
        ..record(expnum, "zero", Path::new("/"))
    }
}

#[test]
fn test_http_catalog_reads_summary() {
    let remote = tempdir().unwrap();
    let summary = NightSummary {
        night: NIGHT.to_string(),
        exposures: vec![record(3, "zero", remote.path()), record(4, "object", remote.path())],
    };
    let body = serde_json::to_string(&summary).unwrap();
    let response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        body.len(),
        body
    );
    let (url, server) = serve_once(response.into_bytes());

    let catalog = HttpNightCatalog::new(&format!("{}/nightsum/{{night}}", url)).unwrap();
    let night = NightIdentifier::parse(NIGHT).unwrap();
    let result = catalog.query_night(&night).unwrap();
    server.join().unwrap();

    assert_eq!(result.night, NIGHT);
    let expnums: Vec<_> = result.exposures.iter().map(|r| r.expnum).collect();
    assert_eq!(expnums, vec![3, 4]);
}

#[test]
fn test_http_catalog_unreachable() {
    let catalog = HttpNightCatalog::new(&format!("{}/{{night}}", DEAD_URL)).unwrap();
    let night = NightIdentifier::parse(NIGHT).unwrap();
    let err = catalog.query_night(&night).unwrap_err();
    assert!(matches!(err, BiasPrepError::CatalogUnavailable { ref night, .. } if night == NIGHT));
}

#[test]
fn test_http_transfer_unreachable() {
    let staging = tempdir().unwrap();
    let rec = http_record(50, format!("{}/c4d_50_ori.fits.fz", DEAD_URL));

    let transfer = LocatorTransfer::new().unwrap();
    let err = transfer.download(&[rec], staging.path()).unwrap_err();
    assert!(matches!(err, BiasPrepError::Transfer { ref file_name, .. } if file_name == "c4d_50_ori.fits.fz"));
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
}

#[test]
fn test_http_transfer_truncated_body_leaves_nothing() {
    let staging = tempdir().unwrap();
    let mut response = b"HTTP/1.1 200 OK\r\nContent-Length: 1000\r\nConnection: close\r\n\r\n".to_vec();
    response.extend_from_slice(b"SIMPLE  = ");
    let (url, server) = serve_once(response);
    let rec = http_record(51, format!("{}/frame/51", url));

    let transfer = LocatorTransfer::new().unwrap();
    let err = transfer.download(&[rec], staging.path()).unwrap_err();
    server.join().unwrap();

    assert!(matches!(err, BiasPrepError::Transfer { .. }));
    // neither the frame nor its `.part` file
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 0);
}

#[test]
fn test_http_transfer_downloads_frame() {
    let staging = tempdir().unwrap();
    let body = b"frame bytes";
    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    ).into_bytes();
    response.extend_from_slice(body);
    let (url, server) = serve_once(response);
    let rec = http_record(52, format!("{}/api/retrieve/52", url));

    let transfer = LocatorTransfer::new().unwrap();
    transfer.download(&[rec], staging.path()).unwrap();
    server.join().unwrap();

    let dest = staging.path().join(frame_file_name(52));
    assert_eq!(std::fs::read(&dest).unwrap(), body);
    assert_eq!(std::fs::read_dir(staging.path()).unwrap().count(), 1);
}

#[test]
fn test_file_url_is_copied() {
    let remote = tempdir().unwrap();
    let staging = tempdir().unwrap();
    let mut rec = remote_catalog(remote.path(), &[(60, "zero")]).remove(0);
    let src = PathBuf::from(&rec.url);
    rec.url = format!("file://{}", rec.url);

    let transfer = LocatorTransfer::new().unwrap();
    transfer.download(&[rec], staging.path()).unwrap();

    let dest = staging.path().join(frame_file_name(60));
    assert_eq!(std::fs::read(&dest).unwrap(), std::fs::read(&src).unwrap());
    assert_eq!(read_exposure_number(&dest).unwrap(), 60);
}

#[test]
fn test_frame_outside_raw_mask_case() {
    // shell glob `*.fits.fz` doesn't expand to upper case names,
    // so such frame can't be ingested and provisioning fails
    let remote = tempdir().unwrap();
    let staging = tempdir().unwrap();
    let src = remote.path().join("C4D_70_ORI.FITS.FZ");
    create_frame(&src, Some(70), Some("NaN"));
    let rec = ExposureRecord {
        url: src.to_str().unwrap().to_string(),
        ..record(70, "zero", remote.path())
    };

    let transfer = LocatorTransfer::new().unwrap();
    let mut progress = RecordingProgress::default();
    let err = provision(
        &[rec],
        staging.path(),
        "*.fits.fz",
        &transfer,
        &default_header_patches(),
        &mut progress,
    ).unwrap_err();

    assert!(matches!(err, BiasPrepError::Transfer { ref file_name, .. } if file_name == "C4D_70_ORI.FITS.FZ"));
    assert!(progress.steps.is_empty());
}

#[test]
fn test_several_raw_masks_refused_before_transfer() {
    let remote = tempdir().unwrap();
    let work = tempdir().unwrap();
    let catalog = VecCatalog {
        exposures: remote_catalog(remote.path(), &[(1, "zero")]),
    };
    let config = RunConfig {
        raw_mask: "*.fits.fz;*.fits".to_string(),
        ..test_config(work.path())
    };
    std::fs::create_dir(&config.staging_dir).unwrap();

    let transfer = CountingTransfer::new();
    let toolchain = LsstToolchain::decam();
    let mut progress = RecordingProgress::default();
    let night = NightIdentifier::parse(NIGHT).unwrap();

    let err = run(&night, &config, Collaborators {
        catalog: &catalog,
        transfer: &transfer,
        toolchain: &toolchain,
        progress: &mut progress,
    }).unwrap_err();

    assert!(matches!(
        err.downcast_ref::<BiasPrepError>(),
        Some(BiasPrepError::Config(_))
    ));
    assert_eq!(transfer.calls.get(), 0);
    assert!(!config.script_name.exists());
}
