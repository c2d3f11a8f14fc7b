/// End-to-end flows through the public API against the stub viewer:
/// start the runtime from a jar directory, open sessions, drive state, poll
/// frames and shut down.

use bdv_runtime::stub::{StubCall, StubEmbedder};
use bdv_runtime::{
    Argb, RuntimeConfig, RuntimeHost, SessionHandle, StartError, Transform, ViewOptions, ViewerError,
};

fn jar_dir() -> tempfile::TempDir {
    let root = tempfile::tempdir().unwrap();
    std::fs::create_dir(root.path().join("jars")).unwrap();
    root
}

#[test]
fn empty_jar_dir_session_round_trip() {
    let root = jar_dir();
    let jars = root.path().join("jars");
    let embedder = StubEmbedder::new().with_first_handle(42).with_sources(3);
    let mut host = RuntimeHost::new(embedder.clone());

    // Default heap option, empty archive directory.
    host.start(&RuntimeConfig::new(None, Some(&jars))).unwrap();
    assert_eq!(
        embedder.last_options(),
        vec!["-Xmx4G".to_string(), "-Djava.class.path=".to_string()]
    );

    {
        let session = host.open("stub://dataset", &ViewOptions::default()).unwrap();
        assert_eq!(session.handle(), SessionHandle(42));

        assert_eq!(session.num_sources().unwrap(), 3);
        session.set_source_visible(1, true).unwrap();
        assert!(session.is_source_visible(1).unwrap());

        let handle = SessionHandle(42);
        let calls = embedder.calls();
        assert_eq!(
            &calls[1..],
            &[
                StubCall::GetNumSources { handle },
                StubCall::SetSourceVisible {
                    handle,
                    source: 1,
                    visible: true
                },
                StubCall::IsSourceVisible { handle, source: 1 },
            ]
        );
    }

    assert!(embedder.live_handles().is_empty());
    host.stop().unwrap();
    assert!(embedder.is_shut_down());
    assert_eq!(embedder.attaches(), embedder.detaches() - 1);
}

#[test]
fn sample_driver_sequence() {
    let root = jar_dir();
    let jars = root.path().join("jars");
    std::fs::write(jars.join("bigdataviewer-core.jar"), b"").unwrap();
    let embedder = StubEmbedder::new().with_sources(6).with_timepoints(10);
    let mut host = RuntimeHost::new(embedder.clone());
    host.start(&RuntimeConfig::new(Some("-Xmx4G"), Some(&jars))).unwrap();

    {
        let view = ViewOptions::new(8, 6, vec![1.0, 0.75, 0.5, 0.25, 0.125]);
        let mut session = host.open("stub://Drosophila", &view).unwrap();
        assert_eq!(session.num_timepoints().unwrap(), 10);

        let t = Transform::from_rows([
            [0.48179778451100014, -0.015139443968170565, 0.38703521637412, -49.847175227038235],
            [0.01752952012083952, 0.6179334597195949, 0.0023498766862651197, -18.37203762649213],
            [-0.38693433215697026, 0.009143480324372823, 0.4820298600739718, 326.2586860796611],
        ]);
        session.set_transform(&t).unwrap();
        session.set_linear_interpolation(true).unwrap();
        for (source, visible) in [true, true, true, false, false, false].into_iter().enumerate() {
            session.set_source_visible(source as i32, visible).unwrap();
        }
        session.set_timepoint(5).unwrap();
        session.set_source_params(0, 200, 1080, Argb(0xff00_ff00)).unwrap();
        session.set_source_params(1, 200, 1080, Argb(0xffff_00ff)).unwrap();
        session.set_source_params(2, 200, 1080, Argb(0xff00_ffff)).unwrap();

        assert_eq!(session.transform().unwrap(), t);
        assert_eq!(embedder.timepoint(session.handle()), Some(5));
        assert_eq!(embedder.linear_interpolation(session.handle()), Some(true));

        let mut frames = 0;
        for _ in 0..5 {
            if let Some(frame) = session.rendered_bitmap().unwrap() {
                assert_eq!(frame.pixels().len(), 48);
                assert_eq!(frame.pixels()[0], 0xff00_ff00);
                frames += 1;
                frame.release().unwrap();
            }
        }
        assert_eq!(frames, 1);

        embedder.request_render(session.handle(), false);
        let frame = session.rendered_bitmap().unwrap().expect("requested frame");
        assert!(!frame.is_complete());
        drop(frame);
        assert_eq!(embedder.pinned(), 0);
    }

    host.stop().unwrap();
}

#[test]
fn runtime_calls_fail_after_stop() {
    let root = jar_dir();
    let jars = root.path().join("jars");
    let mut host = RuntimeHost::new(StubEmbedder::new());
    host.start(&RuntimeConfig::new(None, Some(&jars))).unwrap();
    host.stop().unwrap();

    assert!(matches!(
        host.open("stub://dataset", &ViewOptions::default()),
        Err(ViewerError::NotRunning)
    ));
}

#[test]
fn second_host_in_process_is_rejected() {
    let root = jar_dir();
    let jars = root.path().join("jars");
    let embedder = StubEmbedder::new();

    let mut first = RuntimeHost::new(embedder.clone());
    let mut second = RuntimeHost::new(embedder.clone());
    first.start(&RuntimeConfig::new(None, Some(&jars))).unwrap();
    assert!(matches!(
        second.start(&RuntimeConfig::new(None, Some(&jars))),
        Err(StartError::AlreadyRunning)
    ));

    first.stop().unwrap();
    second.start(&RuntimeConfig::new(None, Some(&jars))).unwrap();
    second.stop().unwrap();
}
