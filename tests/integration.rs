use std::collections::HashMap;
use std::fs;
use std::io::{Cursor, Read};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use brandmark_triage::layout::collect_images;
use brandmark_triage::redact::COVER_COLOR;
use brandmark_triage::{
    DownloadOutcome, Fetch, FetchError, FilterOutcome, MatchCache, NoProgress, PathLayout,
    Pipeline, PipelineOptions, RedactOutcome, RunState, Stage, Template, TemplateRedactor,
    TemplateSet,
};
use image::{GrayImage, ImageFormat, Luma, Rgb, RgbImage};

/// Serves fixed bodies by URL and answers 404 for anything else.
struct MapFetch {
    bodies: HashMap<String, Vec<u8>>,
    calls: AtomicUsize,
}

impl MapFetch {
    fn new(bodies: &[(&str, Vec<u8>)]) -> Self {
        Self {
            bodies: bodies
                .iter()
                .map(|(url, body)| ((*url).to_string(), body.clone()))
                .collect(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl Fetch for MapFetch {
    fn fetch(&self, url: &str) -> Result<Box<dyn Read + Send>, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        match self.bodies.get(url) {
            Some(body) => Ok(Box::new(Cursor::new(body.clone()))),
            None => Err(FetchError::Status(404)),
        }
    }
}

const GRAY: Rgb<u8> = Rgb([90, 110, 100]);

fn fill(img: &mut RgbImage, x: u32, y: u32, w: u32, h: u32, color: Rgb<u8>) {
    for yy in y..y + h {
        for xx in x..x + w {
            img.put_pixel(xx, yy, color);
        }
    }
}

/// Red-on-white badge in the bottom-left corner of a 200x200 canvas.
fn badge_image() -> RgbImage {
    let mut img = RgbImage::from_pixel(200, 200, GRAY);
    fill(&mut img, 10, 160, 50, 25, Rgb([250, 250, 250]));
    fill(&mut img, 20, 165, 30, 15, Rgb([220, 20, 30]));
    img
}

fn png_bytes(img: &RgbImage) -> Vec<u8> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png).unwrap();
    buf.into_inner()
}

fn options() -> PipelineOptions {
    PipelineOptions {
        download_workers: 4,
        cpu_workers: 2,
        ..PipelineOptions::default()
    }
}

fn open(root: &Path, urls: &[&str]) -> Pipeline {
    let pipeline = Pipeline::open(PathLayout::new(root), options()).unwrap();
    fs::write(pipeline.layout().url_file(), urls.join("\n")).unwrap();
    pipeline
}

fn file_count(dir: &Path) -> usize {
    walkdir::WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .count()
}

#[test]
fn duplicate_urls_download_once_and_failures_are_tallied() {
    let tmp = tempfile::tempdir().unwrap();
    let a = "https://cdn.example.com/shop/items/a.jpg";
    let b = "https://cdn.example.com/shop/items/b.jpg";
    let c = "https://cdn.example.com/shop/other/c.jpg";
    let mut pipeline = open(tmp.path(), &[a, b, a, "", c]);
    let fetcher = MapFetch::new(&[(a, b"aaa".to_vec()), (c, b"ccc".to_vec())]);

    let tally = pipeline.download(&fetcher, &NoProgress).unwrap();
    assert_eq!(tally.total(), 3, "duplicates and blank lines collapse");
    assert_eq!(tally.get(DownloadOutcome::Success), 2);
    assert_eq!(tally.get(DownloadOutcome::HttpError(404)), 1);
    assert_eq!(tally.by_tag().get("http_error_404"), Some(&1));

    let unprocessed = pipeline.layout().unprocessed_dir().to_path_buf();
    assert_eq!(file_count(&unprocessed), 2);
    assert_eq!(fs::read(unprocessed.join("shop/items/a.jpg")).unwrap(), b"aaa");
    assert_eq!(fs::read(unprocessed.join("shop/other/c.jpg")).unwrap(), b"ccc");
    assert!(!unprocessed.join("shop/items/b.jpg").exists());
    assert_eq!(pipeline.state().stage, Stage::Filter);
}

#[test]
fn second_download_makes_no_requests_for_stored_files() {
    let tmp = tempfile::tempdir().unwrap();
    let a = "https://cdn.example.com/shop/items/a.jpg";
    let c = "https://cdn.example.com/shop/other/c.jpg";
    let mut pipeline = open(tmp.path(), &[a, c]);
    let fetcher = MapFetch::new(&[(a, b"aaa".to_vec()), (c, b"ccc".to_vec())]);

    pipeline.download(&fetcher, &NoProgress).unwrap();
    assert_eq!(fetcher.calls(), 2);

    let again = pipeline.download(&fetcher, &NoProgress).unwrap();
    assert_eq!(again.get(DownloadOutcome::Skipped), 2);
    assert_eq!(again.total(), 2);
    assert_eq!(fetcher.calls(), 2, "stored files must not be fetched again");
    assert_eq!(file_count(pipeline.layout().unprocessed_dir()), 2);
}

#[test]
fn download_requires_url_list() {
    let tmp = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::open(PathLayout::new(tmp.path()), options()).unwrap();
    let fetcher = MapFetch::new(&[]);
    let err = pipeline.download(&fetcher, &NoProgress).unwrap_err();
    assert!(matches!(err, brandmark_triage::Error::MissingUrlFile(_)));
    assert_eq!(fetcher.calls(), 0);
}

#[test]
fn reset_clears_outputs_and_state_but_keeps_inputs() {
    let tmp = tempfile::tempdir().unwrap();
    let a = "https://cdn.example.com/shop/items/a.jpg";
    let mut pipeline = open(tmp.path(), &[a]);
    let fetcher = MapFetch::new(&[(a, b"aaa".to_vec())]);
    pipeline.download(&fetcher, &NoProgress).unwrap();
    pipeline.set_threshold(0.65).unwrap();
    let template = pipeline.layout().template_dir().join("mark.png");
    fs::write(&template, b"template").unwrap();

    pipeline.reset().unwrap();

    let layout = pipeline.layout();
    assert!(!layout.state_file().exists());
    assert_eq!(file_count(layout.unprocessed_dir()), 0);
    assert_eq!(file_count(layout.processed_dir()), 0);
    assert!(layout.url_file().is_file());
    assert!(template.is_file());
    assert_eq!(pipeline.state(), &RunState::default());

    // A fresh open sees the same defaults.
    let reopened = Pipeline::open(PathLayout::new(tmp.path()), options()).unwrap();
    assert_eq!(reopened.state().stage, Stage::Download);
    assert!((reopened.state().threshold - 0.8).abs() < f32::EPSILON);
}

#[test]
fn full_run_filters_redacts_and_validates() {
    let tmp = tempfile::tempdir().unwrap();
    let plain = "https://cdn.example.com/shop/items/plain.png";
    let badge = "https://cdn.example.com/shop/items/badge.png";
    let broken = "https://cdn.example.com/shop/items/broken.jpg";
    let mut pipeline = open(tmp.path(), &[plain, badge, broken]);
    let fetcher = MapFetch::new(&[
        (plain, png_bytes(&RgbImage::from_pixel(200, 200, GRAY))),
        (badge, png_bytes(&badge_image())),
        (broken, b"not an image".to_vec()),
    ]);

    let downloaded = pipeline.download(&fetcher, &NoProgress).unwrap();
    assert_eq!(downloaded.get(DownloadOutcome::Success), 3);

    let filtered = pipeline.filter(&NoProgress).unwrap();
    assert_eq!(filtered.get(FilterOutcome::NoLogoMoved), 1);
    assert_eq!(filtered.get(FilterOutcome::LogoFoundStay), 1);
    assert_eq!(filtered.get(FilterOutcome::LoadFail), 1);

    let layout = pipeline.layout().clone();
    assert!(layout.processed_dir().join("shop/items/plain.png").is_file());
    assert_eq!(
        file_count(layout.unprocessed_dir()) + file_count(layout.processed_dir()),
        3,
        "filtering moves files, never copies or drops them"
    );

    // No templates yet: nothing can be redacted.
    let unmatched = pipeline.redact(&NoProgress).unwrap();
    assert_eq!(unmatched.get(RedactOutcome::Unmatched), 1);
    assert_eq!(unmatched.get(RedactOutcome::LoadFail), 1);
    assert_eq!(pipeline.validate().unwrap(), vec![badge.to_string(), broken.to_string()]);

    let template = image::imageops::crop_imm(&badge_image(), 5, 155, 60, 35).to_image();
    template.save(layout.template_dir().join("badge.png")).unwrap();

    let redacted = pipeline.redact(&NoProgress).unwrap();
    assert_eq!(redacted.get(RedactOutcome::Processed), 1);
    assert_eq!(redacted.get(RedactOutcome::LoadFail), 1);

    let out = layout.processed_dir().join("shop/items/badge.png");
    let covered = image::open(&out).unwrap().to_rgb8();
    assert_eq!(covered.get_pixel(35, 172), &COVER_COLOR);
    assert_eq!(covered.get_pixel(150, 20), &GRAY);
    assert!(!layout.unprocessed_dir().join("shop/items/badge.png").exists());

    let missing = pipeline.validate().unwrap();
    assert_eq!(missing, vec![broken.to_string()]);
    assert_eq!(pipeline.validate().unwrap(), missing, "validation is read-only");
    assert_eq!(
        collect_images(layout.unprocessed_dir()),
        vec![layout.unprocessed_dir().join("shop/items/broken.jpg")]
    );
    assert!(pipeline.state().is_complete(Stage::Validate));
}

#[test]
fn damaged_state_file_does_not_wipe_finished_work() {
    let tmp = tempfile::tempdir().unwrap();
    let a = "https://cdn.example.com/shop/items/a.jpg";
    let c = "https://cdn.example.com/shop/items/c.jpg";
    let mut pipeline = open(tmp.path(), &[a]);
    let fetcher = MapFetch::new(&[(a, b"aaa".to_vec()), (c, b"ccc".to_vec())]);
    pipeline.download(&fetcher, &NoProgress).unwrap();

    let layout = pipeline.layout().clone();
    let done = layout.processed_dir().join("a/b/done.jpg");
    fs::create_dir_all(done.parent().unwrap()).unwrap();
    fs::write(&done, b"finished").unwrap();
    fs::write(layout.state_file(), "{").unwrap();
    fs::write(layout.url_file(), [a, c].join("\n")).unwrap();

    let mut reopened = Pipeline::open(layout.clone(), options()).unwrap();
    assert!(reopened.state().outputs_prepared);
    let tally = reopened.download(&fetcher, &NoProgress).unwrap();
    assert_eq!(tally.get(DownloadOutcome::Skipped), 1);
    assert_eq!(tally.get(DownloadOutcome::Success), 1);
    assert_eq!(fs::read(&done).unwrap(), b"finished");
    assert_eq!(
        fs::read(layout.unprocessed_dir().join("shop/items/a.jpg")).unwrap(),
        b"aaa"
    );
}

#[test]
fn content_decides_decoder_not_extension() {
    let tmp = tempfile::tempdir().unwrap();
    // PNG bytes served under a .jpg name.
    let url = "https://cdn.example.com/shop/items/plain.jpg";
    let mut pipeline = open(tmp.path(), &[url]);
    let fetcher = MapFetch::new(&[(url, png_bytes(&RgbImage::from_pixel(200, 200, GRAY)))]);
    pipeline.download(&fetcher, &NoProgress).unwrap();

    let tally = pipeline.filter(&NoProgress).unwrap();
    assert_eq!(tally.get(FilterOutcome::NoLogoMoved), 1, "{tally}");
    assert_eq!(tally.get(FilterOutcome::LoadFail), 0);
    assert!(pipeline
        .layout()
        .processed_dir()
        .join("shop/items/plain.jpg")
        .is_file());
}

#[test]
fn nothing_processed_means_every_url_is_missing() {
    let tmp = tempfile::tempdir().unwrap();
    let urls = [
        "https://cdn.example.com/shop/items/one.png",
        "https://cdn.example.com/shop/items/two.png",
        "https://cdn.example.com/shop/other/three.png",
        "https://cdn.example.com/short.png",
    ];
    let mut pipeline = open(tmp.path(), &urls);
    let badge = png_bytes(&badge_image());
    let fetcher = MapFetch::new(&[
        (urls[0], badge.clone()),
        (urls[1], badge.clone()),
        (urls[2], badge),
    ]);

    let downloaded = pipeline.download(&fetcher, &NoProgress).unwrap();
    assert_eq!(downloaded.get(DownloadOutcome::Success), 3);
    assert_eq!(downloaded.get(DownloadOutcome::UrlError), 1);

    let filtered = pipeline.filter(&NoProgress).unwrap();
    assert_eq!(filtered.get(FilterOutcome::LogoFoundStay), 3);
    let redacted = pipeline.redact(&NoProgress).unwrap();
    assert_eq!(redacted.get(RedactOutcome::Unmatched), 3);
    assert_eq!(pipeline.layout().processed_count(), 0);

    let expected: Vec<String> = urls.iter().map(|u| (*u).to_string()).collect();
    assert_eq!(pipeline.validate().unwrap(), expected);
    assert_eq!(pipeline.validate().unwrap(), expected);
}

#[test]
fn filter_requires_unprocessed_tree() {
    let tmp = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::open(PathLayout::new(tmp.path()), options()).unwrap();
    fs::remove_dir_all(pipeline.layout().unprocessed_dir()).unwrap();
    let err = pipeline.filter(&NoProgress).unwrap_err();
    assert!(matches!(err, brandmark_triage::Error::MissingDirectory(_)));
}

/// Vertical stripes, 4 columns wide, at 128 +/- 60.
fn stripe_template() -> GrayImage {
    GrayImage::from_fn(32, 32, |x, _| {
        Luma([if (x / 4) % 2 == 0 { 188 } else { 68 }])
    })
}

/// The stripes plus horizontal +/- 40 bands, pasted into the bottom-left
/// quadrant of a flat canvas. The aligned ZNCC is 60 / sqrt(60^2 + 40^2).
fn banded_canvas() -> RgbImage {
    let mut img = RgbImage::from_pixel(200, 200, Rgb([128, 128, 128]));
    for y in 0..32u32 {
        for x in 0..32u32 {
            let t: i32 = if (x / 4) % 2 == 0 { 60 } else { -60 };
            let e: i32 = if (y / 4) % 2 == 0 { 40 } else { -40 };
            let v = u8::try_from(128 + t + e).unwrap();
            img.put_pixel(20 + x, 140 + y, Rgb([v, v, v]));
        }
    }
    img
}

#[test]
fn lower_threshold_matches_whatever_a_higher_one_does() {
    let set = TemplateSet::new(vec![Template {
        name: "stripes.png".into(),
        image: stripe_template(),
    }]);
    let cache = MatchCache::build(&set);
    let img = banded_canvas();

    let strict = TemplateRedactor::new(0.9).unwrap().find_mark(&img, &cache);
    let loose = TemplateRedactor::new(0.8).unwrap().find_mark(&img, &cache);
    assert!(strict.is_none(), "partial match must not pass 0.9: {strict:?}");
    let found = loose.expect("partial match should pass 0.8");
    assert!(found.score >= 0.8 && found.score < 0.9);

    // Covering the reported rectangle hits the stripes.
    let mut covered = img.clone();
    brandmark_triage::redact::cover(&mut covered, found.rect);
    assert_ne!(covered, img);
}

#[test]
fn threshold_persists_across_reopen() {
    let tmp = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::open(PathLayout::new(tmp.path()), options()).unwrap();
    pipeline.set_threshold(0.6).unwrap();
    assert!(pipeline.set_threshold(1.2).is_err());

    let reopened = Pipeline::open(PathLayout::new(tmp.path()), options()).unwrap();
    assert!((reopened.state().threshold - 0.6).abs() < f32::EPSILON);
}

#[test]
fn redaction_outcome_follows_the_threshold() {
    let tmp = tempfile::tempdir().unwrap();
    let mut pipeline = Pipeline::open(PathLayout::new(tmp.path()), options()).unwrap();
    let layout = pipeline.layout().clone();
    stripe_template()
        .save(layout.template_dir().join("stripes.png"))
        .unwrap();
    let source = layout.unprocessed_dir().join("shop/items/banded.png");
    let dest = layout.processed_dir().join("shop/items/banded.png");
    fs::create_dir_all(source.parent().unwrap()).unwrap();
    banded_canvas().save(&source).unwrap();

    pipeline.set_threshold(0.9).unwrap();
    let strict = pipeline.redact(&NoProgress).unwrap();
    assert_eq!(strict.get(RedactOutcome::Unmatched), 1, "{strict}");
    assert!(source.is_file());
    assert!(!dest.exists());

    pipeline.set_threshold(0.8).unwrap();
    let loose = pipeline.redact(&NoProgress).unwrap();
    assert_eq!(loose.get(RedactOutcome::Processed), 1, "{loose}");
    assert!(!source.exists());
    let covered = image::open(&dest).unwrap().to_rgb8();
    assert_ne!(covered, banded_canvas());
}
