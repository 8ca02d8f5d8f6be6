//! Task 单元测试
