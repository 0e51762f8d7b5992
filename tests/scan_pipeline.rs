//! End-to-end behaviour of the scan pipeline through the public API.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use scan_wedge_lib::capture::{InputEvent, Key, KeyEvent, Modifiers, PasteEvent};
use scan_wedge_lib::symbology::check_digit_str;
use scan_wedge_lib::{
    codec, ChannelKind, DetectionResult, FocusTarget, HostEvent, InputHost, ScannerConfig,
    ScannerService, Symbology,
};

/// Host that remembers the hidden input it was asked to create.
#[derive(Default)]
struct PageHost {
    hidden_id: Option<String>,
    attached: Vec<ChannelKind>,
}

impl InputHost for PageHost {
    fn attach(&mut self, channel: ChannelKind) {
        self.attached.push(channel);
    }
    fn detach(&mut self, channel: ChannelKind) {
        self.attached.retain(|c| *c != channel);
    }
    fn create_hidden_input(&mut self, element_id: &str) {
        self.hidden_id = Some(element_id.to_string());
    }
    fn focus_hidden_input(&mut self) {}
    fn clear_hidden_input(&mut self) {}
    fn destroy_hidden_input(&mut self) {
        self.hidden_id = None;
    }
    fn focused_target(&self) -> FocusTarget {
        FocusTarget::None
    }
}

type Seen = Arc<Mutex<Vec<DetectionResult>>>;

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn listening(t0: Instant) -> (ScannerService<PageHost>, Seen) {
    let mut svc = ScannerService::new(ScannerConfig::default(), PageHost::default());
    let seen: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = seen.clone();
    svc.add_scan_listener(move |r| sink.lock().unwrap().push(r.clone()));
    svc.start_listening(t0);
    (svc, seen)
}

fn type_keys(svc: &mut ScannerService<PageHost>, s: &str, start: Instant, gap_ms: u64) -> Instant {
    let mut at = start;
    for (i, ch) in s.chars().enumerate() {
        at = start + ms(i as u64 * gap_ms);
        svc.handle_event(
            &HostEvent::KeyDown(KeyEvent::char(ch, FocusTarget::None)),
            at,
        );
    }
    at
}

fn values(seen: &Seen) -> Vec<String> {
    seen.lock().unwrap().iter().map(|r| r.value.clone()).collect()
}

fn with_check(data: &str) -> String {
    format!("{data}{}", check_digit_str(data).unwrap())
}

#[test]
fn fast_burst_with_valid_check_digit_notifies_exactly_once() {
    for data in ["400638133393", "200000000001", "590123412345", "123456789012"] {
        let code = with_check(data);
        let t0 = Instant::now();
        let (mut svc, seen) = listening(t0);
        let last = type_keys(&mut svc, &code, t0, 15);
        svc.tick(last + ms(2_000));

        let got = seen.lock().unwrap().clone();
        assert_eq!(got.len(), 1, "code {code}");
        assert_eq!(got[0].value, code);
        assert_eq!(got[0].symbology, Symbology::Ean13);
        assert_eq!(got[0].channel, ChannelKind::KeyEvent);
    }
}

#[test]
fn wrong_check_digit_never_notifies() {
    let code = with_check("400638133393");
    let good = code.chars().last().unwrap().to_digit(10).unwrap();
    let bad = format!("{}{}", &code[..12], (good + 1) % 10);

    let t0 = Instant::now();
    let (mut svc, seen) = listening(t0);
    let last = type_keys(&mut svc, &bad, t0, 10);
    svc.tick(last + ms(2_000));
    assert!(seen.lock().unwrap().is_empty());
}

fn inject_digits(svc: &mut ScannerService<PageHost>, s: &str, start: Instant) -> Instant {
    let mut at = start;
    for (i, ch) in s.chars().enumerate() {
        at = start + ms(i as u64 * 15);
        svc.inject_key(ch, at);
    }
    at
}

#[test]
fn injected_keys_with_correct_check_digit_notify_once_and_wrong_one_never() {
    let data = "200123456789";
    let good = check_digit_str(data).unwrap();
    let bad = char::from_digit((good.to_digit(10).unwrap() + 1) % 10, 10).unwrap();

    let t0 = Instant::now();
    let (mut svc, seen) = listening(t0);
    let last = inject_digits(&mut svc, &format!("{data}{good}"), t0);
    svc.tick(last + ms(2_000));
    let results = seen.lock().unwrap().clone();
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].value, format!("{data}{good}"));
    assert_eq!(results[0].channel, ChannelKind::Injected);

    let t1 = Instant::now();
    let (mut svc, seen) = listening(t1);
    let last = inject_digits(&mut svc, &format!("{data}{bad}"), t1);
    svc.tick(last + ms(2_000));
    assert!(seen.lock().unwrap().is_empty());
}

#[test]
fn human_typing_speed_never_notifies() {
    let t0 = Instant::now();
    let (mut svc, seen) = listening(t0);
    let last = type_keys(&mut svc, "4006381333931", t0, 150);
    svc.tick(last + ms(2_000));
    assert!(seen.lock().unwrap().is_empty());
    assert!(svc.snapshot().current_buffer.is_empty());
}

#[test]
fn same_scan_through_several_channels_collapses() {
    let t0 = Instant::now();
    let (mut svc, seen) = listening(t0);
    let last = type_keys(&mut svc, "4006381333931", t0, 10);

    svc.handle_event(
        &HostEvent::Paste(PasteEvent {
            text: "4006381333931".into(),
            target: FocusTarget::None,
        }),
        last + ms(20),
    );
    let hidden = svc.host().hidden_id.clone().unwrap();
    svc.handle_event(
        &HostEvent::Input(InputEvent {
            element: hidden,
            target: FocusTarget::HiddenInput,
            value: "4006381333931".into(),
        }),
        last + ms(40),
    );
    svc.handle_event(
        &HostEvent::SerialLine {
            line: "4006381333931\r".into(),
        },
        last + ms(60),
    );

    assert_eq!(values(&seen), vec!["4006381333931"]);
}

#[test]
fn repeat_scan_after_cooldown_is_delivered_again() {
    let t0 = Instant::now();
    let (mut svc, seen) = listening(t0);
    type_keys(&mut svc, "4006381333931", t0, 10);
    type_keys(&mut svc, "4006381333931", t0 + ms(400), 10);
    assert_eq!(seen.lock().unwrap().len(), 1);

    type_keys(&mut svc, "4006381333931", t0 + ms(2_000), 10);
    assert_eq!(seen.lock().unwrap().len(), 2);
}

#[test]
fn pasted_code_with_bad_checksum_is_rejected_then_fixed_one_accepted() {
    let t0 = Instant::now();
    let (mut svc, seen) = listening(t0);
    let paste = |text: &str| {
        HostEvent::Paste(PasteEvent {
            text: text.into(),
            target: FocusTarget::None,
        })
    };

    svc.handle_event(&paste("4006381333932"), t0);
    assert!(seen.lock().unwrap().is_empty());

    svc.handle_event(&paste("4006381333931"), t0 + ms(50));
    let got = seen.lock().unwrap().clone();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].channel, ChannelKind::Paste);
}

#[test]
fn short_codes_finalize_on_terminator() {
    let t0 = Instant::now();
    let (mut svc, seen) = listening(t0);
    let last = type_keys(&mut svc, "036000291452", t0, 10);
    let enter = KeyEvent {
        key: Key::Enter,
        modifiers: Modifiers::default(),
        target: FocusTarget::None,
    };
    svc.handle_event(&HostEvent::KeyDown(enter), last + ms(10));

    let got = seen.lock().unwrap().clone();
    assert_eq!(got.len(), 1);
    assert_eq!(got[0].symbology, Symbology::UpcA);
}

#[test]
fn scan_in_progress_at_stop_never_fires() {
    let t0 = Instant::now();
    let (mut svc, seen) = listening(t0);
    let last = type_keys(&mut svc, "96385074", t0, 10);
    svc.stop_listening();
    assert!(svc.host().attached.is_empty());
    assert!(svc.host().hidden_id.is_none());

    svc.tick(last + ms(5_000));
    assert!(seen.lock().unwrap().is_empty());

    // Listeners survive a restart.
    svc.start_listening(last + ms(6_000));
    type_keys(&mut svc, "4006381333931", last + ms(6_100), 10);
    assert_eq!(values(&seen), vec!["4006381333931"]);
}

#[test]
fn panicking_listener_does_not_starve_the_others() {
    let t0 = Instant::now();
    let (mut svc, seen) = listening(t0);
    svc.add_scan_listener(|_| panic!("listener bug"));
    let late: Seen = Arc::new(Mutex::new(Vec::new()));
    let sink = late.clone();
    svc.add_scan_listener(move |r| sink.lock().unwrap().push(r.clone()));

    svc.inject("4006381333931", t0);
    assert_eq!(seen.lock().unwrap().len(), 1);
    assert_eq!(late.lock().unwrap().len(), 1);
}

#[test]
fn generated_codes_validate_and_render() {
    let mut existing = std::collections::HashSet::new();
    for _ in 0..50 {
        let code = codec::generate_code(&existing);
        assert_eq!(code.len(), 13);
        assert!(code.starts_with(codec::INTERNAL_PREFIX));
        assert!(codec::validate(&code));
        assert!(existing.insert(code.clone()), "duplicate {code}");

        let pretty = codec::format(&code);
        assert_eq!(codec::format(&pretty), pretty);
        assert_eq!(codec::unformat(&pretty), code);

        let opts = codec::RenderOptions::default();
        assert!(codec::render(&code, &opts).starts_with("<svg"));
        assert!(codec::render_png_data_url(&code, &opts).starts_with("data:image/png;base64,"));
    }
}
