use std::io::Write;

/// 初始化日志, 默认输出 info 级别, 可以通过环境变量 RUST_LOG 覆盖
pub fn log_init() {
    // 测试中会被多次调用, 重复初始化直接忽略
    let _ = env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .format(|buf, record| writeln!(buf, "{}: {}", record.level(), record.args()))
        .try_init();
}
