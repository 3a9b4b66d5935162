/// Process identity and host memory statistics.
pub mod sys_info;
