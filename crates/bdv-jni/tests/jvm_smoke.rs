//! Runs the real viewer inside an embedded JVM.
//!
//! Needs a JDK (`JAVA_HOME`), the viewer jars in `BDV_JAR_DIR` and a dataset
//! in `BDV_DATASET`:
//!
//! ```text
//! BDV_JAR_DIR=./jars BDV_DATASET=/data/drosophila.xml \
//!     cargo test -p bdv-jni -- --ignored
//! ```
//!
//! JNI allows one VM per process, so everything lives in a single test.

use std::time::{Duration, Instant};

use bdv_jni::JniEmbedder;
use bdv_runtime::{Argb, RuntimeConfig, RuntimeHost, StartError, Transform, ViewOptions, ViewerError};

#[test]
#[ignore = "requires a JVM and the viewer jars"]
fn smoke_test_render_dataset() {
    let dataset = std::env::var("BDV_DATASET").expect("BDV_DATASET must point at a dataset");
    let config = RuntimeConfig::default().with_env_overrides();

    let mut host = RuntimeHost::new(JniEmbedder::new());
    host.start(&config).expect("JVM failed to start; is JAVA_HOME set?");

    // A second host in the same process must be refused.
    let mut other = RuntimeHost::new(JniEmbedder::new());
    assert!(matches!(other.start(&config), Err(StartError::AlreadyRunning)));

    {
        let view = ViewOptions::new(64, 48, vec![1.0, 0.5, 0.25]);
        let mut session = host.open(&dataset, &view).expect("open failed");
        assert!(session.handle().raw() >= 0);

        let sources = session.num_sources().unwrap();
        assert!(sources > 0);
        assert!(session.num_timepoints().unwrap() > 0);

        let t = Transform::from_rows([
            [0.5, 0.0, 0.0, 10.0],
            [0.0, 0.5, 0.0, 20.0],
            [0.0, 0.0, 0.5, 0.0],
        ]);
        session.set_transform(&t).unwrap();
        assert_eq!(session.transform().unwrap(), t);

        session.set_source_visible(0, true).unwrap();
        session.set_source_params(0, 0, 1000, Argb(0xff00_ff00)).unwrap();
        assert_eq!(session.source_max(0).unwrap(), 1000);
        assert_eq!(session.source_color(0).unwrap(), Argb(0xff00_ff00));

        let missing = host.open("/does/not/exist.xml", &view);
        assert!(matches!(missing, Err(ViewerError::OpenFailed(_))));

        let deadline = Instant::now() + Duration::from_secs(30);
        let mut complete = false;
        while Instant::now() < deadline && !complete {
            if let Some(frame) = session.rendered_bitmap().unwrap() {
                assert_eq!(frame.pixels().len(), (frame.width() * frame.height()) as usize);
                complete = frame.is_complete();
                frame.release().unwrap();
            } else {
                std::thread::sleep(Duration::from_millis(50));
            }
        }
        assert!(complete, "viewer never produced a complete frame");
    }

    host.stop().expect("JVM teardown failed");
}
