//! Модуль синтеза речи
//!
//! Содержит клиент бэкенда синтеза с кэшированием, разбиением длинного
//! текста, повторами и предохранителем, а также планировщик пакетного
//! синтеза и голосовую режиссуру.

pub mod cache;
pub mod client;
pub mod direction;
pub mod elevenlabs;
pub mod scheduler;
