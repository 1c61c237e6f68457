mod distributed;
mod end_to_end;
mod lifecycle;
mod workspace;
