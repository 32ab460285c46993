use gx_dispatch::config::Config;

// Environment variables are process-wide, so everything that touches them
// lives in this one test.
#[test]
fn config_from_env() {
    unsafe {
        std::env::remove_var("API_KEYS");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::set_var("API_KEYS", "alpha,beta");
        std::env::set_var("MAX_WORKSPACES", "2");
        std::env::set_var("TASK_FAILURE_RATE", "0.25");
    }
    let config = Config::from_env().unwrap();
    assert_eq!(config.api_keys.len(), 2);
    assert_eq!(config.max_workspaces, 2);
    assert_eq!(config.task_failure_rate, 0.25);
    assert!(!config.log_level.is_empty());

    unsafe {
        std::env::set_var("MAX_WORKSPACES", "9");
    }
    assert!(Config::from_env().is_err());

    unsafe {
        std::env::remove_var("API_KEYS");
        std::env::remove_var("MAX_WORKSPACES");
        std::env::remove_var("TASK_FAILURE_RATE");
    }
}
