use mobile_resolver::mock::MockDriver;
use mobile_resolver::storage::FsArtifactStore;
use mobile_resolver::{
    EngineConfig, Platform, PlatformContext, StateCaptureRing, VerificationEngine,
    VerificationSpec, VerificationType, VerifyOptions,
};
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;

const BEFORE: &str = r#"<hierarchy><android.widget.Button resource-id="submit" text="Submit"/></hierarchy>"#;
const AFTER: &str = r#"<hierarchy><android.widget.TextView resource-id="done" text="Thanks!"/></hierarchy>"#;

#[tokio::test]
async fn test_artifacts_read_back_identically() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let driver = Arc::new(MockDriver::with_tree(BEFORE));
    let screenshot: Vec<u8> = (0u8..=255).collect();
    driver.set_screenshot(screenshot.clone());

    let config = EngineConfig::default();
    let ring = StateCaptureRing::new(
        driver.clone(),
        Arc::new(FsArtifactStore::new(temp_dir.path())),
        PlatformContext::new(Platform::Android),
        config.capture.clone(),
    );

    let record = ring.capture("open_form", json!({ "form": "feedback" })).await;
    assert_eq!(ring.read_screenshot(&record).await?, screenshot);
    assert_eq!(ring.read_tree(&record).await?, BEFORE);
    assert_eq!(record.params["form"], "feedback");
    Ok(())
}

#[tokio::test]
async fn test_capture_around_submit_then_verify() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;
    let driver = Arc::new(MockDriver::with_tree(BEFORE));
    let config = EngineConfig::default();
    let platform = PlatformContext::new(Platform::Android);
    let ring = StateCaptureRing::new(
        driver.clone(),
        Arc::new(FsArtifactStore::new(temp_dir.path())),
        platform,
        config.capture.clone(),
    );

    let submit_driver = driver.clone();
    let captured = ring
        .with_capture("submit", json!({}), || async move {
            submit_driver.set_tree(AFTER);
            Ok(())
        })
        .await?;

    assert_eq!(ring.read_tree(&captured.before).await?, BEFORE);
    assert_eq!(ring.read_tree(&captured.after).await?, AFTER);

    let verifier = VerificationEngine::from_config(driver, platform, &config);
    let result = verifier
        .verify(
            &VerificationSpec::new(VerificationType::TextPresent, "Thanks!"),
            &VerifyOptions::default(),
        )
        .await?;
    assert!(result.verified);
    Ok(())
}
